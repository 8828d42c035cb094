//! Tasks and their self-contained execution context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::Persona;
use super::campaign::Priority;
use super::error::ErrorCode;

/// Kinds of schedulable work. Publishing is deliberately absent: it only
/// runs behind the judge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FetchTrends,
    GenerateContent,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTrends => "fetch_trends",
            Self::GenerateContent => "generate_content",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task state machine: `pending → assigned → in_progress → {completed, failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Persona snapshot embedded in a task so workers never resolve it live.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaConstraints {
    pub persona_ref: String,
    pub name: String,
    pub voice_traits: Vec<String>,
    pub directives: Vec<String>,
}

impl From<&Persona> for PersonaConstraints {
    fn from(persona: &Persona) -> Self {
        Self {
            persona_ref: persona.id.clone(),
            name: persona.name.clone(),
            voice_traits: persona.voice_traits.iter().cloned().collect(),
            directives: persona.directives.clone(),
        }
    }
}

impl PersonaConstraints {
    /// Usable for execution: named, with at least one voice trait.
    pub fn is_usable(&self) -> bool {
        !self.persona_ref.trim().is_empty()
            && !self.name.trim().is_empty()
            && !self.voice_traits.is_empty()
    }
}

/// Everything a stateless worker needs to execute a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskContext {
    pub goal: String,
    pub persona_constraints: PersonaConstraints,
    pub target_platforms: Vec<String>,
    pub content_types: Vec<String>,
    pub agent_id: String,
    pub budget_per_task: f64,
}

/// A unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub campaign_id: String,
    pub correlation_id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub context: TaskContext,
    pub acceptance_criteria: Vec<String>,
    pub assigned_worker_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set when the task ends in `failed`.
    pub failure_reason: Option<ErrorCode>,
}

impl Task {
    /// Create a pending task with a fresh id and correlation id.
    pub fn new(
        campaign_id: impl Into<String>,
        task_type: TaskType,
        priority: Priority,
        context: TaskContext,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: format!("task-{}", Uuid::new_v4()),
            campaign_id: campaign_id.into(),
            correlation_id: format!("corr-{}", Uuid::new_v4()),
            task_type,
            priority,
            status: TaskStatus::Pending,
            context,
            acceptance_criteria: Vec::new(),
            assigned_worker_id: None,
            retry_count: 0,
            max_retries,
            deadline: None,
            created_at,
            failure_reason: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn context() -> TaskContext {
        TaskContext {
            goal: "Explain the launch".into(),
            persona_constraints: PersonaConstraints {
                persona_ref: "p-1".into(),
                name: "Nova".into(),
                voice_traits: vec!["witty".into()],
                directives: vec![],
            },
            target_platforms: vec!["twitter".into()],
            content_types: vec!["text".into()],
            agent_id: "a-1".into(),
            budget_per_task: 1.0,
        }
    }

    #[test]
    fn new_task_is_pending_with_distinct_ids() {
        let now = Utc::now();
        let a = Task::new("c-1", TaskType::GenerateContent, Priority::High, context(), 3, now);
        let b = Task::new("c-1", TaskType::GenerateContent, Priority::High, context(), 3, now);
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.retry_count, 0);
        assert_ne!(a.task_id, b.task_id);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn overdue_only_with_deadline() {
        let now = Utc::now();
        let t = Task::new("c-1", TaskType::FetchTrends, Priority::Low, context(), 1, now);
        assert!(!t.is_overdue(now + Duration::days(365)));
        let t = t.with_deadline(now + Duration::seconds(5));
        assert!(!t.is_overdue(now));
        assert!(t.is_overdue(now + Duration::seconds(5)));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
    }
}
