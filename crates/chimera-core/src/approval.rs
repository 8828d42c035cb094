//! Approval sealing.
//!
//! The skill runtime owns a random per-process key. It hands out exactly one
//! [`ApprovalAuthority`], which the judge takes at construction; approvals
//! minted by anyone else carry no valid seal and are refused at the publish
//! gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ApprovalRecord, ApprovedBy};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("approval authority already issued")]
pub struct AuthorityAlreadyIssued;

/// Sealing key plus the one-shot authority binding.
pub struct ApprovalKeyring {
    key: Arc<[u8; 32]>,
    issued: AtomicBool,
}

impl std::fmt::Debug for ApprovalKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalKeyring")
            .field("issued", &self.issued.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalKeyring {
    fn default() -> Self {
        Self::generate()
    }
}

impl ApprovalKeyring {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self {
            key: Arc::new(key),
            issued: AtomicBool::new(false),
        }
    }

    /// Issue the minting capability. Fails on every call after the first.
    pub fn issue_authority(&self) -> Result<ApprovalAuthority, AuthorityAlreadyIssued> {
        if self.issued.swap(true, Ordering::SeqCst) {
            return Err(AuthorityAlreadyIssued);
        }
        Ok(ApprovalAuthority {
            key: Arc::clone(&self.key),
        })
    }

    /// True when `record` is an approval sealed by this keyring's authority.
    pub fn verify(&self, record: &ApprovalRecord) -> bool {
        if !record.is_approval() {
            return false;
        }
        let (Some(mac), Ok(tag)) = (keyed(&self.key, record), hex::decode(&record.seal)) else {
            return false;
        };
        mac.verify_slice(&tag).is_ok()
    }
}

/// The only way to mint an [`ApprovalRecord`] the runtime accepts.
pub struct ApprovalAuthority {
    key: Arc<[u8; 32]>,
}

impl std::fmt::Debug for ApprovalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalAuthority").finish_non_exhaustive()
    }
}

impl ApprovalAuthority {
    pub fn approve(
        &self,
        result_id: impl Into<String>,
        approved_by: ApprovedBy,
        now: DateTime<Utc>,
    ) -> ApprovalRecord {
        let mut record = ApprovalRecord::approved(result_id, approved_by, now);
        if let Some(mac) = keyed(&self.key, &record) {
            record.seal = hex::encode(mac.finalize().into_bytes());
        }
        record
    }
}

fn keyed(key: &[u8; 32], record: &ApprovalRecord) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(record.sealed_fields().as_bytes());
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decision;

    #[test]
    fn authority_is_issued_once() {
        let keyring = ApprovalKeyring::generate();
        assert!(keyring.issue_authority().is_ok());
        assert_eq!(keyring.issue_authority().unwrap_err(), AuthorityAlreadyIssued);
    }

    #[test]
    fn sealed_approval_verifies_and_edits_break_it() {
        let keyring = ApprovalKeyring::generate();
        let authority = keyring.issue_authority().unwrap();
        let record = authority.approve("res-1", ApprovedBy::Judge, Utc::now());
        assert!(keyring.verify(&record));

        let mut moved = record.clone();
        moved.result_id = "res-2".into();
        assert!(!keyring.verify(&moved));

        let mut rejected = record.clone();
        rejected.decision = Decision::Rejected;
        assert!(!keyring.verify(&rejected));
    }

    #[test]
    fn another_keyring_does_not_accept_the_seal() {
        let other = ApprovalKeyring::generate();
        let record = other
            .issue_authority()
            .unwrap()
            .approve("res-1", ApprovedBy::Judge, Utc::now());
        assert!(!ApprovalKeyring::generate().verify(&record));
    }

    #[test]
    fn seal_survives_serialization() {
        let keyring = ApprovalKeyring::generate();
        let record = keyring
            .issue_authority()
            .unwrap()
            .approve("res-1", ApprovedBy::HitlReviewer, Utc::now());
        let back: ApprovalRecord =
            serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
        assert!(keyring.verify(&back));
    }
}
