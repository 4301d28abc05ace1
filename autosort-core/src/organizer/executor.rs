//! Bounded parallel execution of move batches

use crate::organizer::{MoveOperation, MoveOutcome, Mover, Result, report};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Runs batches of moves on a fixed-size worker pool
#[derive(Debug)]
pub struct BatchExecutor {
    pool: ThreadPool,
    mover: Mover,
    workers: usize,
}

impl BatchExecutor {
    pub fn new(workers: usize, mover: Mover) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("autosort-mover-{index}"))
            .build()?;

        Ok(Self { pool, mover, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Move every operation and return one outcome per operation, in input
    /// order. Completion order across workers is unspecified.
    pub fn execute(&self, operations: &[MoveOperation]) -> Vec<MoveOutcome> {
        debug!("Executing batch of {} moves on {} workers", operations.len(), self.workers);

        let outcomes: Vec<MoveOutcome> = self
            .pool
            .install(|| operations.par_iter().map(|op| self.mover.relocate(op)).collect());

        for outcome in &outcomes {
            report(outcome);
        }

        outcomes
    }
}
