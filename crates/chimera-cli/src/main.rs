//! Chimera - command-line driver for the content swarm
//!
//! The `chimera` command seeds a swarm from a scenario file, runs planning
//! cycles and inspects the committed state and audit trail.
//!
//! ## Commands
//!
//! - `run`: Admit a scenario and run cycles until the swarm goes idle
//! - `state`: Print the committed global state
//! - `audit`: Print audit events, optionally for one correlation id
//! - `validate`: Check a scenario file without touching storage
//! - `config`: Print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use chimera_core::metrics::METRICS;
use chimera_core::{
    AuditLedger, CycleReport, GlobalState, Scenario, ScriptedBackend, StateStore, Swarm,
    SwarmConfig,
};
use chimera_state::{connect_from_env, SurrealAuditLedger, SurrealStateStore};

#[derive(Parser)]
#[command(name = "chimera")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Planner/Worker/Judge swarm for governed content publishing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Swarm configuration file (JSON); CHIMERA_* variables override it
    #[arg(long, global = true, env = "CHIMERA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit a scenario and run cycles until nothing is left to do
    Run {
        /// Scenario file (JSON: personas, agents, campaigns)
        scenario: PathBuf,

        /// Upper bound on cycles
        #[arg(short, long, default_value = "5")]
        cycles: usize,

        /// Write the cycle reports as JSON to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Print the committed global state
    State,

    /// Print audit events
    Audit {
        /// Only events for this correlation id
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Check a scenario file without touching storage
    Validate {
        scenario: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    chimera_core::init_tracing(cli.json, level);

    let config = SwarmConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            scenario,
            cycles,
            report,
        } => {
            let (store, ledger) = open_storage().await?;
            cmd_run(config, store, ledger, &scenario, cycles, report.as_deref()).await?;
            Ok(())
        }
        Commands::State => {
            let (store, _) = open_storage().await?;
            cmd_state(store.as_ref()).await
        }
        Commands::Audit { correlation_id } => {
            let (_, ledger) = open_storage().await?;
            cmd_audit(ledger.as_ref(), correlation_id.as_deref()).await
        }
        Commands::Validate { scenario } => cmd_validate(&scenario),
        Commands::Config => cmd_config(&config),
    }
}

/// Open the state store and audit ledger on one database connection
async fn open_storage() -> Result<(Arc<dyn StateStore<GlobalState>>, Arc<dyn AuditLedger>)> {
    let db = connect_from_env()
        .await
        .context("Failed to connect to Chimera database")?;
    let store = SurrealStateStore::<GlobalState>::new(db.clone())
        .await
        .context("Failed to open state store")?;
    let ledger = SurrealAuditLedger::new(db)
        .await
        .context("Failed to open audit ledger")?;
    Ok((Arc::new(store), Arc::new(ledger)))
}

/// Seed the swarm from a scenario and run it until idle
async fn cmd_run(
    config: SwarmConfig,
    store: Arc<dyn StateStore<GlobalState>>,
    ledger: Arc<dyn AuditLedger>,
    scenario_path: &Path,
    cycles: usize,
    report_path: Option<&Path>,
) -> Result<Vec<CycleReport>> {
    let scenario = Scenario::from_file(scenario_path)
        .context(format!("Invalid scenario: {:?}", scenario_path))?;
    let catalog = scenario.catalog()?;

    let swarm = Swarm::new(
        config,
        store,
        ledger,
        Arc::new(ScriptedBackend::new()),
        Arc::new(catalog),
        None,
    )
    .context("Failed to start swarm")?;

    let admitted = scenario.admit(&swarm).await?;
    println!(
        "Admitted {} agent(s), {} campaign(s) ({} already present)",
        admitted.agents, admitted.campaigns, admitted.skipped
    );

    let reports = swarm.run_until_idle(cycles).await?;
    for r in &reports {
        println!(
            "cycle {:>3}  planned {:>2}  assigned {:>2}  completed {:>2}  approved {:>2}  rejected {:>2}  failed {:>2}  published {:>2}  version {}",
            r.cycle, r.planned, r.assigned, r.completed, r.approved, r.rejected, r.failed, r.published, r.state_version
        );
    }

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json).context(format!("Failed to write report to {:?}", path))?;
        info!(path = %path.display(), "cycle report written");
    }

    METRICS.flush();
    swarm.shutdown().await;
    Ok(reports)
}

/// Print the committed global state as JSON
async fn cmd_state(store: &dyn StateStore<GlobalState>) -> Result<()> {
    let current = store.read().await.context("Failed to read state")?;
    println!("version {}", current.state_version);
    println!("{}", serde_json::to_string_pretty(&current.state)?);
    Ok(())
}

/// Print audit events in sequence order
async fn cmd_audit(ledger: &dyn AuditLedger, correlation_id: Option<&str>) -> Result<()> {
    let events = match correlation_id {
        Some(id) => ledger.events_for(id).await?,
        None => ledger.all_events().await?,
    };

    if events.is_empty() {
        println!("No audit events found");
        return Ok(());
    }

    for e in events {
        println!(
            "{:>6}  {}  {:<36}  {}  {}",
            e.seq,
            e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            e.event_name,
            e.correlation_id,
            e.payload
        );
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let scenario =
        Scenario::from_file(path).context(format!("Invalid scenario: {:?}", path))?;
    println!(
        "OK: {} persona(s), {} agent(s), {} campaign(s)",
        scenario.personas.len(),
        scenario.agents.len(),
        scenario.campaigns.len()
    );
    Ok(())
}

fn cmd_config(config: &SwarmConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "personas": [{
            "id": "persona-nova",
            "name": "Nova",
            "voice_traits": ["curious", "warm"],
            "directives": ["Always disclose AI generation"]
        }],
        "agents": [{
            "agent_id": "agent-1",
            "name": "Nova Prime",
            "persona_ref": "persona-nova",
            "wallet_address": "0x52908400098527886E0F7030069857D2E4169EE7"
        }],
        "campaigns": [{
            "campaign_id": "camp-1",
            "goal_description": "Announce the beta",
            "agent_ids": ["agent-1"],
            "budget_allocation": { "daily_limit": 10.0, "per_task_limit": 2.0 },
            "constraints": { "platforms": ["twitter"], "content_types": ["text"] }
        }]
    }"#;

    fn write_scenario(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_validate_accepts_well_formed_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(&dir, SCENARIO);
        assert!(cmd_validate(&path).is_ok());
    }

    #[test]
    fn test_validate_rejects_campaign_without_agents() {
        let dir = tempfile::tempdir().unwrap();
        let body = SCENARIO.replace(r#""agent_ids": ["agent-1"]"#, r#""agent_ids": []"#);
        let path = write_scenario(&dir, &body);
        assert!(cmd_validate(&path).is_err());
    }

    #[tokio::test]
    async fn test_run_publishes_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(&dir, SCENARIO);
        let report_path = dir.path().join("report.json");

        let store: Arc<dyn StateStore<GlobalState>> =
            Arc::new(SurrealStateStore::<GlobalState>::in_memory().await.unwrap());
        let ledger: Arc<dyn AuditLedger> = Arc::new(SurrealAuditLedger::in_memory().await.unwrap());

        let reports = cmd_run(
            SwarmConfig::default(),
            Arc::clone(&store),
            Arc::clone(&ledger),
            &path,
            5,
            Some(&report_path),
        )
        .await
        .unwrap();

        assert_eq!(reports[0].approved, 2);
        assert_eq!(reports[0].published, 1);
        assert!(reports.last().unwrap().is_quiet());

        let state = store.read().await.unwrap().state;
        assert_eq!(state.published_count(), 1);
        assert!(!ledger.all_events().await.unwrap().is_empty());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), reports.len());
    }

    #[test]
    fn test_config_prints_defaults() {
        assert!(cmd_config(&SwarmConfig::default()).is_ok());
    }
}
