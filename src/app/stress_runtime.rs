//! Background registration stress runtime.
//!
//! Worker threads hammer one shared [`ObjectTree`] with independent chains
//! and stream progress back over a channel, so the driver loop can report
//! while they run.  When every worker has finished, [`finish`] checks that
//! no node was lost or duplicated and tears the whole forest down.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::TreeConfig;
use crate::core::action::ObjectTreeAction;
use crate::core::tree::ObjectTree;

// ───────────────────────────────────────── resources ─────────

/// Resource type registered by the stress workers.
#[derive(Debug, PartialEq, Eq)]
pub enum StressResource {
    Root,
    Link {
        worker: usize,
        chain: usize,
        depth: usize,
    },
}

/// Counts executions; used to verify "exactly once per node".
#[derive(Default)]
pub struct CountingAction {
    executed: AtomicUsize,
}

impl CountingAction {
    pub fn count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl ObjectTreeAction<StressResource> for CountingAction {
    fn execute(&self, _object: &Arc<StressResource>) -> anyhow::Result<()> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ───────────────────────────────────────── plan ──────────────

#[derive(Debug, Clone)]
pub struct StressPlan {
    pub threads: usize,
    /// Chains registered by each worker.
    pub chains: usize,
    /// Resources per chain.
    pub depth: usize,
    /// Dispose every odd chain right after registering it, so execution races
    /// registration on the same tree.
    pub churn: bool,
}

impl StressPlan {
    pub fn from_config(config: &TreeConfig) -> Self {
        Self {
            threads: config.stress_threads,
            chains: config.stress_chains,
            depth: config.chain_depth,
            churn: false,
        }
    }

    /// Chains each worker leaves registered.
    pub fn surviving_chains(&self) -> usize {
        if self.churn {
            self.chains - self.chains / 2
        } else {
            self.chains
        }
    }

    /// Tree size once every worker is done: the shared root plus every
    /// surviving chain link.
    pub fn expected_size(&self) -> usize {
        1 + self.threads * self.surviving_chains() * self.depth
    }
}

// ───────────────────────────────────────── run ───────────────

#[derive(Debug)]
pub enum StressUpdate {
    ChainRegistered { worker: usize, chain: usize },
    ChainDisposed { worker: usize, chain: usize },
    WorkerDone { worker: usize },
}

pub struct StressRun {
    remaining_workers: usize,
    chains_registered: usize,
    chains_disposed: usize,
    started: Instant,
    /// Shared flag used to signal worker threads to stop early.
    cancel: Arc<AtomicBool>,
}

impl StressRun {
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.remaining_workers > 0
    }

    pub fn chains_registered(&self) -> usize {
        self.chains_registered
    }

    pub fn chains_disposed(&self) -> usize {
        self.chains_disposed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fold one worker message into the run.  Returns `true` when the last
    /// worker has just finished.
    pub fn apply_update(&mut self, update: StressUpdate) -> bool {
        match update {
            StressUpdate::ChainRegistered { .. } => {
                self.chains_registered += 1;
                false
            }
            StressUpdate::ChainDisposed { .. } => {
                self.chains_disposed += 1;
                false
            }
            StressUpdate::WorkerDone { worker } => {
                tracing::debug!(worker, "stress worker done");
                self.remaining_workers = self.remaining_workers.saturating_sub(1);
                self.remaining_workers == 0
            }
        }
    }
}

/// Spawn `plan.threads` workers registering chains under `root`.
pub fn start_stress(
    tree: &Arc<ObjectTree<StressResource>>,
    root: &Arc<StressResource>,
    plan: &StressPlan,
    tx: &UnboundedSender<StressUpdate>,
) -> anyhow::Result<StressRun> {
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_count = plan.threads.max(1);

    for worker in 0..worker_count {
        let tree = Arc::clone(tree);
        let root = Arc::clone(root);
        let tx = tx.clone();
        let cancel = Arc::clone(&cancel);
        let plan = plan.clone();
        std::thread::Builder::new()
            .name(format!("stress-{worker}"))
            .spawn(move || {
                let discard = CountingAction::default();
                for chain in 0..plan.chains {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }

                    let mut parent = Arc::clone(&root);
                    let mut head = None;
                    for depth in 0..plan.depth {
                        let link = Arc::new(StressResource::Link {
                            worker,
                            chain,
                            depth,
                        });
                        tree.register(&parent, &link);
                        head.get_or_insert_with(|| Arc::clone(&link));
                        parent = link;
                    }
                    let _ = tx.send(StressUpdate::ChainRegistered { worker, chain });

                    if plan.churn && chain % 2 == 1 {
                        if let Some(head) = head {
                            tree.execute_all(&head, true, &discard, false);
                            let _ = tx.send(StressUpdate::ChainDisposed { worker, chain });
                        }
                    }
                }

                let _ = tx.send(StressUpdate::WorkerDone { worker });
            })
            .with_context(|| format!("spawning stress worker {worker}"))?;
    }

    Ok(StressRun {
        remaining_workers: worker_count,
        chains_registered: 0,
        chains_disposed: 0,
        started: Instant::now(),
        cancel,
    })
}

#[derive(Debug)]
pub struct StressReport {
    pub size: usize,
    pub expected: usize,
    pub executed: usize,
    pub elapsed: Duration,
}

/// Verify the tree after all workers are done, then dispose the root and
/// check nothing is left behind.
pub fn finish(
    tree: &ObjectTree<StressResource>,
    root: &Arc<StressResource>,
    plan: &StressPlan,
    run: &StressRun,
) -> anyhow::Result<StressReport> {
    ensure!(!run.is_running(), "stress workers are still running");

    let size = tree.size();
    let expected = plan.expected_size();
    ensure!(size == expected, "tree holds {size} nodes, expected {expected}");
    ensure!(
        tree.root_objects().len() == 1,
        "expected the shared root to be the only root"
    );

    let counter = CountingAction::default();
    tree.execute_all(root, true, &counter, false);
    let executed = counter.count();
    ensure!(executed == size, "executed {executed} nodes out of {size}");
    tree.assert_is_empty(true)?;

    Ok(StressReport {
        size,
        expected,
        executed,
        elapsed: run.elapsed(),
    })
}
