//! Domain models for Chimera.
//!
//! Canonical definitions for the core entities:
//! - `Agent` / `Persona`: who produces content and in what voice
//! - `Campaign`: the goal being pursued
//! - `Task`: a schedulable unit of work with a self-contained context
//! - `ResultArtifact`: immutable worker output
//! - `ApprovalRecord` / `PublicationRecord`: governance and its external effects
//! - `GlobalState`: the committed aggregate

pub mod agent;
pub mod approval;
pub mod artifact;
pub mod campaign;
pub mod error;
pub mod publication;
pub mod state;
pub mod task;

pub use agent::{Agent, AgentStatus, InMemoryPersonaCatalog, Persona, PersonaCatalog};
pub use approval::{ApprovalRecord, ApprovedBy, Decision};
pub use artifact::{ArtifactType, CallKind, Provenance, ResultArtifact, ToolUsageEntry};
pub use campaign::{BudgetAllocation, Campaign, CampaignStatus, Constraints, Priority};
pub use error::{ChimeraError, ErrorCode, Result};
pub use publication::{PublicationRecord, PublicationStatus};
pub use state::GlobalState;
pub use task::{PersonaConstraints, Task, TaskContext, TaskStatus, TaskType};
