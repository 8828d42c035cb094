//! Chimera Core Library
//!
//! Planner/Worker/Judge orchestration for a swarm of content agents: domain
//! model, audit emitter, mediation layer, skills, scheduler, planner, judge
//! and the swarm that wires them together, plus seed scenarios for the
//! binaries.

pub mod approval;
pub mod audit;
pub mod config;
pub mod content_filter;
pub mod domain;
pub mod judge;
pub mod mediation;
pub mod metrics;
pub mod obs;
pub mod planner;
pub mod scenario;
pub mod scheduler;
pub mod skills;
pub mod swarm;
pub mod telemetry;
pub mod worker;

pub use approval::{ApprovalAuthority, ApprovalKeyring};
pub use audit::AuditEmitter;
pub use config::{
    JudgeConfig, MediationConfig, PlannerConfig, SchedulerConfig, SwarmConfig, WorkerConfig,
};
pub use content_filter::ContentFilter;

pub use domain::{
    Agent, AgentStatus, ApprovalRecord, ApprovedBy, ArtifactType, BudgetAllocation, Campaign,
    CampaignStatus, ChimeraError, Constraints, Decision, ErrorCode, GlobalState,
    InMemoryPersonaCatalog, Persona, PersonaCatalog, PersonaConstraints, Priority, Provenance,
    PublicationRecord, PublicationStatus, Result, ResultArtifact, Task, TaskContext, TaskStatus,
    TaskType, ToolUsageEntry,
};

pub use judge::{
    Disposition, HumanReviewer, Judge, JudgeError, JudgePolicy, JudgeRule, JudgeVerdict,
    ReviewDecision, StaticReviewer, Submission,
};
pub use mediation::scripted::ScriptedBackend;
pub use mediation::{McpBackend, McpFailure, McpFailureKind, McpSession, MediationLayer, ToolRegistry};
pub use planner::{CampaignPlan, PlanReport, Planner, PlannerError};
pub use scenario::{AgentSpec, Scenario};
pub use scheduler::{FailureDisposition, Scheduler, SchedulerError};
pub use skills::{
    Skill, SkillFailure, SkillOutcome, SkillOutput, SkillRegistry, SkillRequest, SkillRuntime,
};
pub use swarm::{CycleReport, Swarm, SwarmError};
pub use telemetry::init_tracing;
pub use worker::{Assignment, Execution, Worker, WorkerOutcome, WorkerPool};

pub use chimera_state::{
    AuditEvent, AuditLedger, StateStore, SurrealAuditLedger, SurrealStateStore, VersionedState,
};
