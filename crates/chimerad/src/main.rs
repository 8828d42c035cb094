use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

use chimera_core::metrics::METRICS;
use chimera_core::{
    GlobalState, InMemoryPersonaCatalog, Scenario, ScriptedBackend, Swarm, SwarmConfig,
};
use chimera_state::{connect_from_env, SurrealAuditLedger, SurrealStateStore};

#[derive(Parser)]
#[command(name = "chimerad")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs swarm cycles on a fixed tick until interrupted", long_about = None)]
struct Args {
    /// Swarm configuration file (JSON)
    #[arg(long, env = "CHIMERA_CONFIG")]
    config: Option<PathBuf>,

    /// Scenario admitted at startup
    #[arg(long, env = "CHIMERA_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Milliseconds between cycles
    #[arg(long, env = "CHIMERA_TICK_MS", default_value = "1000")]
    tick_ms: u64,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    chimera_core::init_tracing(args.json, Level::INFO);

    let config = SwarmConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let scenario = match &args.scenario {
        Some(path) => Scenario::from_file(path).context(format!("Invalid scenario: {:?}", path))?,
        None => Scenario::default(),
    };
    let catalog: InMemoryPersonaCatalog = scenario.catalog()?;

    let db = connect_from_env()
        .await
        .context("Failed to connect to Chimera database")?;
    let store = SurrealStateStore::<GlobalState>::new(db.clone()).await?;
    let ledger = SurrealAuditLedger::new(db).await?;

    let swarm = Swarm::new(
        config,
        Arc::new(store),
        Arc::new(ledger),
        Arc::new(ScriptedBackend::new()),
        Arc::new(catalog),
        None,
    )?;
    scenario.admit(&swarm).await?;

    info!(tick_ms = args.tick_ms, "chimerad started");
    let cycles = serve(&swarm, Duration::from_millis(args.tick_ms), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    })
    .await;

    METRICS.flush();
    swarm.shutdown().await;
    info!(cycles, "chimerad stopped");
    Ok(())
}

/// Run one cycle per tick until `shutdown` resolves. A failed cycle is
/// logged and the next tick proceeds. Returns the number of cycles run.
async fn serve<F>(swarm: &Swarm, tick: Duration, shutdown: F) -> u64
where
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut cycles = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                match swarm.run_cycle().await {
                    Ok(report) => {
                        cycles += 1;
                        if !report.is_quiet() {
                            info!(
                                cycle = report.cycle,
                                approved = report.approved,
                                published = report.published,
                                failed = report.failed,
                                state_version = report.state_version,
                                "cycle finished"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "cycle failed"),
                }
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::StateStore;

    const SCENARIO: &str = r#"{
        "personas": [{
            "id": "persona-nova",
            "name": "Nova",
            "voice_traits": ["curious"],
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
            "constraints": { "platforms": ["twitter"] }
        }]
    }"#;

    #[tokio::test]
    async fn serve_runs_cycles_until_shutdown() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let store = Arc::new(SurrealStateStore::<GlobalState>::in_memory().await.unwrap());
        let swarm = Swarm::new(
            SwarmConfig::default(),
            store.clone(),
            Arc::new(SurrealAuditLedger::in_memory().await.unwrap()),
            Arc::new(ScriptedBackend::new()),
            Arc::new(scenario.catalog().unwrap()),
            None,
        )
        .unwrap();
        scenario.admit(&swarm).await.unwrap();

        let cycles = serve(
            &swarm,
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await;
        swarm.shutdown().await;

        assert!(cycles >= 1);
        let state = store.read().await.unwrap().state;
        assert_eq!(state.published_count(), 1);
    }
}
