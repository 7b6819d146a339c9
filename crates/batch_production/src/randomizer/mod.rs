//! Epoch-scoped ordering of the bundled sequence stream.
//!
//! Two strategies, selected once at session initialization: source-order
//! pass-through and the windowed block shuffle. Both honor worker decimation
//! and the epoch sample budget, so the subsets delivered to the workers of an
//! epoch are pairwise disjoint and their union is the (possibly size-limited)
//! ordered stream.

mod block;
mod passthrough;

pub use block::BlockRandomizer;
pub use passthrough::PassthroughRandomizer;

use crate::sequences::SequenceBatch;
use crate::ElemType;
use anyhow::{ensure, Result};

/// Sentinel epoch size meaning "one full sweep over the dataset".
pub const FULL_DATA_SWEEP: usize = usize::MAX;

/// Per-epoch settings handed down by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochConfiguration {
    pub worker_rank: usize,
    pub num_workers: usize,
    pub minibatch_size_in_samples: usize,
    /// Total epoch size in samples across all workers, or
    /// [`FULL_DATA_SWEEP`] for the entire dataset.
    pub epoch_size_in_samples: usize,
    /// Also the randomization seed: the same epoch index always reproduces
    /// the same ordering.
    pub epoch_index: usize,
}

impl EpochConfiguration {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.num_workers > 0, "Epoch requires at least one worker");
        ensure!(
            self.worker_rank < self.num_workers,
            "Worker rank {} out of range for {} workers",
            self.worker_rank,
            self.num_workers
        );
        ensure!(
            self.minibatch_size_in_samples > 0,
            "Minibatch size must be positive"
        );
        ensure!(
            self.epoch_size_in_samples > 0,
            "Unsupported epoch size '0'"
        );
        Ok(())
    }
}

/// How the ordered stream is partitioned across distributed workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimationMode {
    /// Whole chunks go to one worker, preserving intra-chunk locality.
    Chunk,
    /// Individual sequences round-robin by rank; finer-grained, loses
    /// chunk locality.
    Sequence,
}

/// The ordered, decimated, budgeted sequence stream of one epoch.
///
/// The stream is lazy and restartable only via `start_epoch`.
pub trait SequenceRandomizer<T: ElemType>: Send {
    /// Resets cursor state and the remaining-sample budget, and re-seeds
    /// ordering from the epoch index.
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()>;

    /// Delivers whole sequences until `max_samples` is reached, always at
    /// least one when the epoch is not exhausted. The terminal delivery
    /// carries `end_of_epoch = true` (possibly alongside data).
    fn next_sequences(&mut self, max_samples: usize) -> Result<SequenceBatch<T>>;
}
