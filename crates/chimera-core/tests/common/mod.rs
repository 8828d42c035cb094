//! Fixtures shared by the integration suites.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use chimera_core::config::{JudgeConfig, MediationConfig};
use chimera_core::domain::{
    Agent, ApprovalRecord, BudgetAllocation, Campaign, Constraints, GlobalState, Persona, PersonaConstraints,
    Priority, Task, TaskContext, TaskType,
};
use chimera_core::{
    AuditEmitter, ContentFilter, Disposition, HumanReviewer, Judge, MediationLayer, ResultArtifact,
    ScriptedBackend, SkillRegistry, SkillRuntime, StateStore, Submission, ToolRegistry, Worker,
    WorkerOutcome,
};
use chimera_state::fakes::{MemoryAuditLedger, MemoryStateStore};

pub const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

pub fn persona(id: &str) -> Persona {
    Persona {
        id: id.into(),
        name: "Nova".into(),
        backstory: "Developer advocate for an open tooling collective.".into(),
        voice_traits: BTreeSet::from(["curious".to_string(), "warm".to_string()]),
        directives: vec![
            "Always disclose AI generation".to_string(),
            "Never mention competitors".to_string(),
        ],
        core_beliefs: vec!["Tools should be open".to_string()],
    }
}

pub fn agent(id: &str, persona_ref: &str) -> Agent {
    Agent::new(id, format!("Agent {id}"), persona_ref, WALLET).unwrap()
}

pub fn campaign(id: &str, goal: &str, agent_ids: &[&str], platforms: &[&str]) -> Campaign {
    Campaign::new(
        id,
        goal,
        agent_ids.iter().map(|a| a.to_string()),
        Priority::Medium,
        BudgetAllocation {
            daily_limit: 100.0,
            per_task_limit: 10.0,
        },
        Constraints {
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
            content_types: vec!["text".to_string()],
        },
    )
    .unwrap()
}

pub fn task(task_type: TaskType, platforms: &[&str], now: DateTime<Utc>) -> Task {
    Task::new(
        "camp-1",
        task_type,
        Priority::Medium,
        TaskContext {
            goal: "Announce the public beta".into(),
            persona_constraints: PersonaConstraints::from(&persona("persona-nova")),
            target_platforms: platforms.iter().map(|p| p.to_string()).collect(),
            content_types: vec!["text".to_string()],
            agent_id: "agent-1".into(),
            budget_per_task: 1.0,
        },
        3,
        now,
    )
}

/// Store, ledger, scripted backend, skill runtime and a judge bound to the
/// store, wired the way the swarm wires them.
pub struct Harness {
    pub store: Arc<MemoryStateStore<GlobalState>>,
    pub ledger: Arc<MemoryAuditLedger>,
    pub backend: Arc<ScriptedBackend>,
    pub audit: AuditEmitter,
    pub runtime: Arc<SkillRuntime>,
    pub judge: Arc<Judge>,
}

impl Harness {
    pub fn new(config: JudgeConfig) -> Self {
        Self::with_reviewer(config, None)
    }

    pub fn with_reviewer(config: JudgeConfig, reviewer: Option<Arc<dyn HumanReviewer>>) -> Self {
        Self::build(config, reviewer, ScriptedBackend::new())
    }

    /// Default judge over a custom backend, e.g. one with added latency.
    pub fn over(backend: ScriptedBackend) -> Self {
        Self::build(JudgeConfig::default(), None, backend)
    }

    fn build(
        config: JudgeConfig,
        reviewer: Option<Arc<dyn HumanReviewer>>,
        backend: ScriptedBackend,
    ) -> Self {
        let store = Arc::new(MemoryStateStore::<GlobalState>::new());
        let ledger = Arc::new(MemoryAuditLedger::new());
        let backend = Arc::new(backend);
        let (audit, _handle) = AuditEmitter::spawn(ledger.clone());
        let mediation = Arc::new(MediationLayer::new(
            backend.clone(),
            ToolRegistry::standard(),
            audit.clone(),
            &MediationConfig::default(),
        ));
        let filter = ContentFilter::new(&config.unsafe_patterns).unwrap();
        let registry = SkillRegistry::builtin(mediation.tools(), filter).unwrap();
        let runtime = Arc::new(SkillRuntime::new(registry, mediation, audit.clone()));
        let judge = Judge::new(
            store.clone() as Arc<dyn StateStore<GlobalState>>,
            runtime.clone(),
            audit.clone(),
            config,
            Duration::from_secs(5),
            reviewer,
        )
        .unwrap();
        Self {
            store,
            ledger,
            backend,
            audit,
            runtime,
            judge: Arc::new(judge),
        }
    }

    /// Run `task` on a fresh worker and package the artifact for the judge.
    pub async fn produce(&self, task: &Task) -> Submission {
        match Worker::new("worker-0")
            .execute(task, &self.runtime, Duration::from_secs(5))
            .await
        {
            WorkerOutcome::Completed(artifact) => Submission {
                task: task.clone(),
                artifact,
            },
            WorkerOutcome::Failed(failure) => panic!("worker failed: {failure}"),
        }
    }

    /// A judge-issued approval, obtained by having the judge approve a
    /// trend report (which publishes nothing).
    pub async fn judge_approval(&self) -> ApprovalRecord {
        let t = task(TaskType::FetchTrends, &["twitter"], Utc::now());
        let submission = self.produce(&t).await;
        match self.judge.evaluate(submission).await {
            Ok(Disposition::Approved { approval, .. }) => approval,
            other => panic!("expected approval, got {other:?}"),
        }
    }

    pub async fn version(&self) -> u64 {
        self.store.read().await.unwrap().state_version
    }
}

/// A copy of `submission` whose artifact has been altered by `f`.
pub fn tampered(submission: &Submission, f: impl FnOnce(&mut ResultArtifact)) -> Submission {
    let mut copy = submission.clone();
    f(&mut copy.artifact);
    copy
}
