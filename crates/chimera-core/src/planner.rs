//! Campaign planner.
//!
//! Reads a campaign plus a GlobalState snapshot and emits self-contained
//! tasks. Per-campaign memory (emitted sub-goals, research flag, spend) sits
//! behind its own async mutex, so one campaign plans serially while several
//! campaigns plan concurrently. The planner never writes GlobalState.
//!
//! Decomposition: the goal is split into sub-goals on `.`, `;` and newlines.
//! A campaign without an approved trend report first gets one `fetch_trends`
//! task. Each `(sub-goal, content type)` pair then yields one
//! `generate_content` task, deduplicated by the SHA-256 of the normalised
//! pair. Agents are assigned round-robin among the campaign's active agents
//! whose persona resolves; the others are reported and left out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::AuditEmitter;
use crate::config::{PlannerConfig, SchedulerConfig};
use crate::domain::{
    Agent, Campaign, GlobalState, PersonaCatalog, PersonaConstraints, Task, TaskContext, TaskType,
};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("campaign {0} has no active agents")]
    NoActiveAgent(String),

    #[error("agent {agent_id} references unknown persona '{persona_ref}'")]
    PersonaNotFound { agent_id: String, persona_ref: String },

    #[error("persona '{persona_ref}' is not usable: {reason}")]
    InvalidPersona { persona_ref: String, reason: String },

    #[error("campaign {0} targets no platforms")]
    NoPlatforms(String),
}

pub type PlannerResult<T> = std::result::Result<T, PlannerError>;

#[derive(Debug, Default)]
struct CampaignMemory {
    emitted: HashSet<String>,
    researched: bool,
    spend_day: Option<NaiveDate>,
    spent_today: f64,
    next_agent: usize,
}

impl CampaignMemory {
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.spend_day != Some(today) {
            self.spend_day = Some(today);
            self.spent_today = 0.0;
        }
    }
}

/// Result of planning every known campaign once.
#[derive(Debug, Default)]
pub struct PlanReport {
    pub tasks: Vec<Task>,
    /// Campaigns that could not be planned, and agents left out of a
    /// campaign's rotation, keyed by campaign id.
    pub errors: Vec<(String, PlannerError)>,
}

/// Tasks emitted for one campaign.
#[derive(Debug, Default)]
pub struct CampaignPlan {
    pub tasks: Vec<Task>,
    /// Active agents whose persona could not be used this cycle.
    pub skipped_agents: Vec<PlannerError>,
}

pub struct Planner {
    config: PlannerConfig,
    scheduling: SchedulerConfig,
    personas: Arc<dyn PersonaCatalog>,
    audit: AuditEmitter,
    memories: Mutex<HashMap<String, Arc<tokio::sync::Mutex<CampaignMemory>>>>,
}

/// A normalised sub-goal.
fn sub_goals(goal: &str) -> Vec<String> {
    let parts: Vec<String> = goal
        .split(['.', ';', '\n'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        vec![goal.trim().to_string()]
    } else {
        parts
    }
}

fn dedup_key(campaign_id: &str, sub_goal: &str, content_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(campaign_id.as_bytes());
    hasher.update([0]);
    hasher.update(sub_goal.to_lowercase().as_bytes());
    hasher.update([0]);
    hasher.update(content_type.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

fn acceptance_criteria(task_type: TaskType) -> Vec<String> {
    let items: &[&str] = match task_type {
        TaskType::FetchTrends => &["trends sorted by relevance", "relevance scores within [0, 1]"],
        TaskType::GenerateContent => &[
            "one variant per target platform",
            "text within platform character limits",
            "AI disclosure label on every variant",
        ],
    };
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Planner {
    pub fn new(
        config: PlannerConfig,
        scheduling: SchedulerConfig,
        personas: Arc<dyn PersonaCatalog>,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            config,
            scheduling,
            personas,
            audit,
            memories: Mutex::new(HashMap::new()),
        }
    }

    fn memory(&self, campaign_id: &str) -> Arc<tokio::sync::Mutex<CampaignMemory>> {
        let mut memories = self.memories.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(memories.entry(campaign_id.to_string()).or_default())
    }

    /// Plan every campaign in `state` concurrently.
    #[instrument(skip_all, fields(campaigns = state.campaigns.len()))]
    pub async fn plan_cycle(&self, state: &GlobalState, now: DateTime<Utc>) -> PlanReport {
        let plans = join_all(
            state
                .campaigns
                .values()
                .map(|c| async move { (c.campaign_id.clone(), self.plan_campaign(c, state, now).await) }),
        )
        .await;

        let mut report = PlanReport::default();
        for (campaign_id, result) in plans {
            match result {
                Ok(plan) => {
                    report.tasks.extend(plan.tasks);
                    for e in plan.skipped_agents {
                        obs::emit_planner_error(&campaign_id, &e);
                        report.errors.push((campaign_id.clone(), e));
                    }
                }
                Err(e) => {
                    obs::emit_planner_error(&campaign_id, &e);
                    report.errors.push((campaign_id, e));
                }
            }
        }
        report
    }

    /// Emit new tasks for one campaign. Non-active campaigns yield none.
    #[instrument(skip_all, fields(campaign_id = %campaign.campaign_id))]
    pub async fn plan_campaign(
        &self,
        campaign: &Campaign,
        state: &GlobalState,
        now: DateTime<Utc>,
    ) -> PlannerResult<CampaignPlan> {
        if !campaign.is_active() {
            return Ok(CampaignPlan::default());
        }

        let plan_id = format!("plan-{}", Uuid::new_v4());
        self.audit.emit(
            "planner.cycle.start",
            &plan_id,
            json!({ "campaign_id": campaign.campaign_id }),
        );

        let result = self.decompose(campaign, state, now, &plan_id).await;
        match &result {
            Ok(plan) => self.audit.emit(
                "planner.cycle.complete",
                &plan_id,
                json!({
                    "campaign_id": campaign.campaign_id,
                    "emitted": plan.tasks.len(),
                    "skipped_agents": plan.skipped_agents.len(),
                }),
            ),
            Err(e) => self.audit.emit(
                "planner.cycle.failure",
                &plan_id,
                json!({ "campaign_id": campaign.campaign_id, "error": e.to_string() }),
            ),
        }
        result
    }

    async fn decompose(
        &self,
        campaign: &Campaign,
        state: &GlobalState,
        now: DateTime<Utc>,
        plan_id: &str,
    ) -> PlannerResult<CampaignPlan> {
        let active: Vec<&Agent> = campaign
            .agent_ids()
            .iter()
            .filter_map(|id| state.agents.get(id))
            .filter(|a| a.is_active())
            .collect();
        if active.is_empty() {
            return Err(PlannerError::NoActiveAgent(campaign.campaign_id.clone()));
        }
        if campaign.constraints.platforms.is_empty() {
            return Err(PlannerError::NoPlatforms(campaign.campaign_id.clone()));
        }

        // Everything fallible happens before campaign memory is touched.
        let mut agents: Vec<(&Agent, PersonaConstraints)> = Vec::with_capacity(active.len());
        let mut skipped_agents = Vec::new();
        for agent in active {
            match self.persona_for(agent) {
                Ok(persona) => agents.push((agent, persona)),
                Err(e) => {
                    self.audit.emit(
                        "planner.agent_skipped",
                        plan_id,
                        json!({ "agent_id": agent.agent_id, "error": e.to_string() }),
                    );
                    skipped_agents.push(e);
                }
            }
        }
        if agents.is_empty() {
            let mut skipped = skipped_agents.into_iter();
            return Err(skipped
                .next()
                .unwrap_or_else(|| PlannerError::NoActiveAgent(campaign.campaign_id.clone())));
        }

        let memory = self.memory(&campaign.campaign_id);
        let mut memory = memory.lock().await;
        memory.roll_day(now);

        let content_types: Vec<String> = if campaign.constraints.content_types.is_empty() {
            vec!["text".to_string()]
        } else {
            campaign.constraints.content_types.clone()
        };

        // (type, goal, content type, dedup key); research carries no key.
        let mut candidates: Vec<(TaskType, String, String, Option<String>)> = Vec::new();
        if !memory.researched && !state.has_trend_report(&campaign.campaign_id) {
            candidates.push((
                TaskType::FetchTrends,
                campaign.goal_description.clone(),
                content_types[0].clone(),
                None,
            ));
        }
        for sub_goal in sub_goals(&campaign.goal_description) {
            for content_type in &content_types {
                let key = dedup_key(&campaign.campaign_id, &sub_goal, content_type);
                let queued = candidates.iter().any(|c| c.3.as_ref() == Some(&key));
                if !queued && !memory.emitted.contains(&key) {
                    candidates.push((
                        TaskType::GenerateContent,
                        sub_goal.clone(),
                        content_type.clone(),
                        Some(key),
                    ));
                }
            }
        }

        let budget = &campaign.budget_allocation;
        let mut tasks = Vec::new();
        for (task_type, goal, content_type, key) in candidates {
            if tasks.len() >= self.config.max_tasks_per_cycle {
                break;
            }
            let cost = self.config.cost_of(task_type);
            if cost > budget.per_task_limit {
                continue;
            }
            if memory.spent_today + cost > budget.daily_limit {
                break;
            }

            let (agent, persona) = &agents[memory.next_agent % agents.len()];
            let mut task = Task::new(
                &campaign.campaign_id,
                task_type,
                campaign.priority,
                TaskContext {
                    goal,
                    persona_constraints: persona.clone(),
                    target_platforms: campaign.constraints.platforms.clone(),
                    content_types: vec![content_type],
                    agent_id: agent.agent_id.clone(),
                    budget_per_task: cost,
                },
                self.scheduling.default_max_retries,
                now,
            )
            .with_acceptance_criteria(acceptance_criteria(task_type));
            if let Some(secs) = self.scheduling.task_deadline_secs {
                task = task.with_deadline(now + chrono::Duration::seconds(secs as i64));
            }

            memory.next_agent = memory.next_agent.wrapping_add(1);
            memory.spent_today += cost;
            match key {
                Some(key) => {
                    memory.emitted.insert(key);
                }
                None => memory.researched = true,
            }

            METRICS.inc_tasks_planned();
            obs::emit_task_planned(&campaign.campaign_id, &task.task_id, task_type.as_str());
            self.audit.emit(
                "planner.task_emitted",
                &task.correlation_id,
                json!({
                    "plan_id": plan_id,
                    "task_id": task.task_id,
                    "campaign_id": campaign.campaign_id,
                    "task_type": task_type,
                    "agent_id": agent.agent_id,
                    "estimated_cost": cost,
                }),
            );
            tasks.push(task);
        }
        Ok(CampaignPlan {
            tasks,
            skipped_agents,
        })
    }

    fn persona_for(&self, agent: &Agent) -> PlannerResult<PersonaConstraints> {
        let persona = self.personas.resolve(&agent.persona_ref).ok_or_else(|| {
            PlannerError::PersonaNotFound {
                agent_id: agent.agent_id.clone(),
                persona_ref: agent.persona_ref.clone(),
            }
        })?;
        persona.validate().map_err(|e| PlannerError::InvalidPersona {
            persona_ref: agent.persona_ref.clone(),
            reason: e.to_string(),
        })?;
        Ok(PersonaConstraints::from(&persona))
    }

    /// Projected spend recorded for `campaign_id` on the current day.
    pub async fn spent_today(&self, campaign_id: &str) -> f64 {
        self.memory(campaign_id).lock().await.spent_today
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_splits_on_sentence_boundaries() {
        assert_eq!(
            sub_goals("Announce the beta.  Recruit testers; thank early users\n"),
            vec!["Announce the beta", "Recruit testers", "thank early users"]
        );
        assert_eq!(sub_goals("single goal"), vec!["single goal"]);
    }

    #[test]
    fn dedup_key_normalises_case() {
        assert_eq!(
            dedup_key("c-1", "Announce", "TEXT"),
            dedup_key("c-1", "announce", "text")
        );
        assert_ne!(dedup_key("c-1", "a", "text"), dedup_key("c-2", "a", "text"));
    }
}
