//! Diagnostics driver for the ownership tree.
//!
//! `stress` hammers one tree from many threads and verifies it afterwards,
//! `leak-check` demonstrates the leak report, and `config` shows or writes the
//! effective configuration.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ownership_tree::app::stress_runtime::{self, StressPlan, StressResource};
use ownership_tree::config::{self, TreeConfig};
use ownership_tree::{DisposableRef, Disposer, ObjectTree};

// ───────────────────────────────────────── CLI ───────────────

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), about = "Ownership tree diagnostics")]
struct Cli {
    /// Capture allocation traces for every registered resource.
    #[arg(long, global = true)]
    debug: bool,

    /// Read configuration from this file instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register chains from many threads, then verify and dispose them.
    Stress {
        /// Worker threads (defaults to `stress_threads` from the config).
        #[arg(long)]
        threads: Option<usize>,
        /// Chains per worker.
        #[arg(long)]
        chains: Option<usize>,
        /// Resources per chain.
        #[arg(long)]
        depth: Option<usize>,
        /// Dispose every other chain while the workers are still registering.
        #[arg(long)]
        churn: bool,
    },
    /// Build a small hierarchy, leave some roots undisposed and report them.
    LeakCheck {
        /// Number of roots to leak on purpose.
        #[arg(long, default_value_t = 1)]
        leak: usize,
        /// Only log leaks instead of failing.
        #[arg(long)]
        lenient: bool,
    },
    /// Print the effective configuration.
    Config {
        /// Also save it to the config file.
        #[arg(long)]
        write: bool,
    },
}

// ───────────────────────────────────────── commands ──────────

async fn run_stress(config: &TreeConfig, plan: StressPlan) -> Result<()> {
    let tree = Arc::new(ObjectTree::new(config.debug_mode));
    let root = Arc::new(StressResource::Root);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    tracing::info!(?plan, expected = plan.expected_size(), "starting stress run");
    let mut run = stress_runtime::start_stress(&tree, &root, &plan, &tx)?;
    drop(tx);

    let mut progress = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            biased;

            update = rx.recv() => {
                let Some(update) = update else {
                    anyhow::bail!("stress workers exited without finishing");
                };
                let mut done = run.apply_update(update);
                // Drain everything already queued before checking progress.
                while let Ok(update) = rx.try_recv() {
                    done |= run.apply_update(update);
                }
                if done {
                    break;
                }
            }

            _ = progress.tick() => {
                tracing::info!(
                    registered = run.chains_registered(),
                    disposed = run.chains_disposed(),
                    nodes = tree.size(),
                    "stress progress"
                );
            }

            _ = tokio::signal::ctrl_c() => {
                run.request_cancel();
                anyhow::bail!("stress run interrupted");
            }
        }
    }

    let report = stress_runtime::finish(&tree, &root, &plan, &run)?;
    println!(
        "ok: {} nodes registered by {} threads, {} executed, {:.2?}",
        report.size, plan.threads, report.executed, report.elapsed
    );
    Ok(())
}

fn run_leak_check(config: &TreeConfig, leak: usize, lenient: bool) -> Result<()> {
    let disposer = Disposer::new(config);

    let app = disposer.new_disposable("application");
    for i in 0..3 {
        let service = disposer.new_disposable(format!("service-{i}"));
        disposer.register(&app, &service);
        disposer.register(&service, &disposer.new_disposable(format!("service-{i}/cache")));
    }
    let leaked: Vec<DisposableRef> = (0..leak)
        .map(|i| {
            let root = disposer.new_disposable(format!("forgotten-{i}"));
            disposer.register(&root, &disposer.new_disposable(format!("forgotten-{i}/child")));
            root
        })
        .collect();

    disposer.dispose(&app);
    tracing::info!(
        remaining = disposer.tree().size(),
        leaked = leaked.len(),
        "application disposed"
    );

    let throw_on_leak = config.throw_on_leak && !lenient;
    disposer.assert_is_empty(throw_on_leak)?;
    if leaked.is_empty() {
        println!("ok: tree is empty");
    } else {
        println!("{} leaked root(s) logged", leaked.len());
    }
    Ok(())
}

fn run_config(config: &TreeConfig, write: bool) -> Result<()> {
    println!("{config:#?}");
    if write {
        let path = config.save()?;
        println!("saved to {}", path.display());
    } else {
        println!("config file: {}", config::config_path().display());
    }
    Ok(())
}

// ───────────────────────────────────────── main ─────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr) // stdout carries command results
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TreeConfig::load_with_env(path),
        None => TreeConfig::load(),
    };
    if cli.debug {
        config.debug_mode = true;
    }

    match cli.command {
        Command::Stress {
            threads,
            chains,
            depth,
            churn,
        } => {
            let mut plan = StressPlan::from_config(&config);
            plan.threads = threads.unwrap_or(plan.threads).max(1);
            plan.chains = chains.unwrap_or(plan.chains).max(1);
            plan.depth = depth.unwrap_or(plan.depth).max(1);
            plan.churn = churn;
            run_stress(&config, plan).await
        }
        Command::LeakCheck { leak, lenient } => run_leak_check(&config, leak, lenient),
        Command::Config { write } => run_config(&config, write),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ownership_tree::TreeError;

    #[test]
    fn leak_check_fails_with_leak_error() {
        let err = run_leak_check(&TreeConfig::default(), 2, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TreeError>(),
            Some(TreeError::LeakDetected { leaked: 2, .. })
        ));
    }

    #[test]
    fn leak_check_passes_when_lenient_or_clean() {
        assert!(run_leak_check(&TreeConfig::default(), 2, true).is_ok());
        assert!(run_leak_check(&TreeConfig::default(), 0, false).is_ok());
    }
}
