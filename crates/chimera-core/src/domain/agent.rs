//! Agents and the personas they reference.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ChimeraError, Result};

/// Lifecycle status of an agent. The only agent field that may change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Retired,
}

/// A content-producing agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    /// Immutable, unique identifier.
    pub agent_id: String,

    pub name: String,

    /// Weak reference (id or path) to a [`Persona`].
    pub persona_ref: String,

    /// Hex-encoded wallet address (format-checked only).
    pub wallet_address: String,

    pub status: AgentStatus,

    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new active agent.
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        persona_ref: impl Into<String>,
        wallet_address: impl Into<String>,
    ) -> Result<Self> {
        let agent = Self {
            agent_id: agent_id.into(),
            name: name.into(),
            persona_ref: persona_ref.into(),
            wallet_address: wallet_address.into(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
        };
        agent.validate()?;
        Ok(agent)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(ChimeraError::InvalidAgent("agent_id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ChimeraError::InvalidAgent("name must not be empty".into()));
        }
        if self.persona_ref.trim().is_empty() {
            return Err(ChimeraError::InvalidAgent(
                "persona_ref must not be empty".into(),
            ));
        }
        if !is_wallet_address(&self.wallet_address) {
            return Err(ChimeraError::InvalidAgent(format!(
                "wallet_address '{}' is not 0x followed by 40 hex digits",
                self.wallet_address
            )));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_wallet_address(addr: &str) -> bool {
    match addr.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Immutable behavioural specification referenced by agents and tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub backstory: String,
    #[serde(default)]
    pub voice_traits: BTreeSet<String>,
    /// Ordered behavioural rules.
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default)]
    pub core_beliefs: Vec<String>,
}

impl Persona {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ChimeraError::InvalidPersona("id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ChimeraError::InvalidPersona(format!(
                "persona '{}' has no name",
                self.id
            )));
        }
        if self.voice_traits.is_empty() {
            return Err(ChimeraError::InvalidPersona(format!(
                "persona '{}' declares no voice traits",
                self.id
            )));
        }
        if self.directives.is_empty() {
            return Err(ChimeraError::InvalidPersona(format!(
                "persona '{}' declares no directives",
                self.id
            )));
        }
        Ok(())
    }
}

/// Resolves persona references to loaded personas.
pub trait PersonaCatalog: Send + Sync {
    fn resolve(&self, persona_ref: &str) -> Option<Persona>;
}

/// In-memory [`PersonaCatalog`]; only valid personas are accepted.
#[derive(Debug, Default)]
pub struct InMemoryPersonaCatalog {
    personas: RwLock<HashMap<String, Persona>>,
}

impl InMemoryPersonaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, persona: Persona) -> Result<()> {
        persona.validate()?;
        let mut guard = self.personas.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(persona.id.clone(), persona);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.personas.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersonaCatalog for InMemoryPersonaCatalog {
    fn resolve(&self, persona_ref: &str) -> Option<Persona> {
        let guard = self.personas.read().unwrap_or_else(|e| e.into_inner());
        guard.get(persona_ref).cloned()
    }
}
