//! Theater router entry point.
//!
//! Wires configuration, logging, the dispatch engine, the rule file and the
//! projector controller together, then runs until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! theater-router [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   Config file [default: platform config dir]
//!   --rules     <PATH>   Rule file [default: from config, else next to it]
//!   --log-level <LEVEL>  Overrides RUST_LOG and the config file
//!   --write-config       Write the effective config to the config path and exit
//! ```
//!
//! Status lines (one per rule outcome) go to stdout; logs go to stderr.
//!
//! ```text
//! main()
//!  └─ load AppConfig
//!  └─ DispatchEngine::new()        -- status receiver pumped to stdout
//!  └─ bind registry                -- projector destination + power source
//!  └─ load rules from TOML
//!  └─ engine.start()
//!  └─ PowerWatcher::spawn()        -- polls the projector
//!  └─ wait for Ctrl-C, then stop everything
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use theater_core::{Community, ValueCodecRegistry};
use theater_router::application::dispatch::{DispatchEngine, EngineConfig};
use theater_router::application::registry::Controllers;
use theater_router::infrastructure::projector::{
    power_enum, PowerWatcher, ProjectorDestination, ProjectorLink,
};
use theater_router::infrastructure::storage::config::{
    config_file_path, load_config_from, rules_file_path, save_config_to, AppConfig,
};
use theater_router::infrastructure::storage::rules_file::TomlRuleFile;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Rule-driven event router for home theater devices.
#[derive(Debug, Parser)]
#[command(name = "theater-router", version)]
struct Cli {
    /// Configuration file; defaults to `config.toml` in the platform config
    /// directory.
    #[arg(long, env = "THEATER_CONFIG")]
    config: Option<PathBuf>,

    /// Rule file; overrides `router.rules_file` from the configuration.
    #[arg(long, env = "THEATER_RULES")]
    rules: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `theater_router=trace`.
    #[arg(long, env = "THEATER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration (defaults filled in) to the config
    /// path and exit.
    #[arg(long)]
    write_config: bool,
}

fn init_logging(cli_level: Option<&str>, config: &AppConfig) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.router.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Waits for the power watcher; returns `false` (and logs) if it panicked or
/// was cancelled.
async fn join_watcher(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("power watcher ended abnormally: {e}");
            false
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => config_file_path().context("no --config given")?,
    };
    let config = load_config_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    if cli.write_config {
        save_config_to(&config, &config_path)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    init_logging(cli.log_level.as_deref(), &config);
    info!("theater router starting with {}", config_path.display());

    // ── Engine and status pump ────────────────────────────────────────────────
    let (engine, mut status_rx) = DispatchEngine::new(EngineConfig {
        action_timeout: config.router.action_timeout(),
    });
    tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            println!("{event}");
        }
    });

    // ── Controllers ───────────────────────────────────────────────────────────
    let mut codecs = ValueCodecRegistry::new();
    codecs.register_enum(power_enum());

    let mut controllers = Controllers::new();
    let mut watcher = None;
    if config.projector.enabled {
        let projector_cfg = &config.projector;
        let community = Community::new(&projector_cfg.community)
            .context("invalid projector community")?;
        let link = Arc::new(ProjectorLink::new(
            projector_cfg.address(),
            projector_cfg.connect_timeout(),
            projector_cfg.read_timeout(),
        ));
        let projector = Arc::new(ProjectorDestination::new(
            projector_cfg.name.clone(),
            community,
            link,
        ));

        match projector.model_name().await {
            Ok(model) => info!("projector {model} at {}", projector_cfg.address()),
            Err(e) => warn!("projector at {} not answering: {e}", projector_cfg.address()),
        }

        let power = Arc::new(PowerWatcher::new(Arc::clone(&projector)));
        controllers = controllers
            .with_destination(projector)
            .with_source(power.clone());
        watcher = projector_cfg.poll_interval().map(|interval| (power, interval));
    }
    engine.bind_registry(&controllers);

    // ── Rules ─────────────────────────────────────────────────────────────────
    let rules_path = match cli.rules {
        Some(path) => path,
        None => rules_file_path(&config).context("cannot locate the rule file")?,
    };
    let store = TomlRuleFile::new(&rules_path, codecs);
    let rules = engine.load_rules(&store);
    for (index, rule) in rules.iter().enumerate() {
        if let Err(e) = engine.registry().check_rule(rule) {
            warn!("rule {}: {e}", index + 1);
        }
    }
    info!("{} rule(s) from {}", rules.len(), rules_path.display());

    // ── Run ───────────────────────────────────────────────────────────────────
    engine.start().context("failed to start dispatch engine")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = watcher
        .map(|(power, interval)| power.spawn(engine.publisher(), interval, shutdown_rx));

    info!("theater router ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    shutdown_tx.send_replace(true);
    if let Some(task) = watcher_task {
        join_watcher(task).await;
    }
    tokio::task::spawn_blocking(move || engine.stop())
        .await
        .context("dispatch engine stop panicked")?;

    info!("theater router stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_watcher_reports_a_panicked_task() {
        let task = tokio::spawn(async { panic!("poll loop blew up") });
        assert!(!join_watcher(task).await);
    }

    #[tokio::test]
    async fn test_join_watcher_accepts_a_clean_exit() {
        assert!(join_watcher(tokio::spawn(async {})).await);
    }

    #[test]
    fn test_write_config_flag_parses() {
        let cli = Cli::parse_from(["theater-router", "--write-config", "--config", "/tmp/c.toml"]);
        assert!(cli.write_config);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
