//! Windowed block shuffle with worker decimation.

use super::{DecimationMode, EpochConfiguration, SequenceRandomizer, FULL_DATA_SWEEP};
use crate::bundler::Bundler;
use crate::sequences::{ChunkId, SequenceBatch, SequenceRecord};
use crate::ElemType;
use anyhow::Result;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;

/// Shuffles the bundled stream per epoch: chunk order globally, sequence
/// order within a sliding window of materialized chunks.
///
/// The permutation generator is seeded from the epoch index, so the same
/// epoch always reproduces the same ordering. Every worker of an epoch
/// computes the identical global order, which is what makes the decimated
/// subsets disjoint and union-complete.
pub struct BlockRandomizer<T: ElemType> {
    bundler: Bundler<T>,
    /// Randomization window in chunks; `None` = entire dataset.
    window: Option<usize>,
    decimation: DecimationMode,
    verbosity: i32,

    // Epoch state, reset by `start_epoch`.
    worker_rank: usize,
    num_workers: usize,
    rng: StdRng,
    chunk_order: Vec<ChunkId>,
    next_window_start: usize,
    window_size: usize,
    pending: VecDeque<SequenceRecord<T>>,
    global_position: usize,
    remaining_budget: usize,
    exhausted: bool,
}

impl<T: ElemType> BlockRandomizer<T> {
    pub fn new(
        bundler: Bundler<T>,
        window: Option<usize>,
        decimation: DecimationMode,
        verbosity: i32,
    ) -> Self {
        Self {
            bundler,
            window,
            decimation,
            verbosity,
            worker_rank: 0,
            num_workers: 1,
            rng: StdRng::seed_from_u64(0),
            chunk_order: Vec::new(),
            next_window_start: 0,
            window_size: 0,
            pending: VecDeque::new(),
            global_position: 0,
            remaining_budget: 0,
            exhausted: true,
        }
    }

    pub fn bundler(&self) -> &Bundler<T> {
        &self.bundler
    }

    /// Materializes the next window of chunks, shuffles sequence order
    /// within it and queues this worker's share.
    fn refill_window(&mut self) -> Result<()> {
        if self.next_window_start >= self.chunk_order.len() {
            self.exhausted = true;
            return Ok(());
        }

        let start = self.next_window_start;
        let end = (start + self.window_size).min(self.chunk_order.len());
        self.next_window_start = end;

        let mut entries: Vec<(usize, SequenceRecord<T>)> = Vec::new();
        for chunk_position in start..end {
            let chunk = self.bundler.load_chunk(self.chunk_order[chunk_position])?;
            entries.extend(chunk.sequences.into_iter().map(|s| (chunk_position, s)));
        }
        entries.shuffle(&mut self.rng);

        if self.verbosity >= 3 {
            trace!(
                "Randomization window [{}, {}): {} sequences",
                start,
                end,
                entries.len()
            );
        }

        for (chunk_position, sequence) in entries {
            if self.remaining_budget == 0 {
                self.exhausted = true;
                break;
            }
            self.remaining_budget = self.remaining_budget.saturating_sub(sequence.frames);

            let owned = match self.decimation {
                DecimationMode::Chunk => chunk_position % self.num_workers == self.worker_rank,
                DecimationMode::Sequence => {
                    self.global_position % self.num_workers == self.worker_rank
                }
            };
            self.global_position += 1;
            if owned {
                self.pending.push_back(sequence);
            }
        }
        Ok(())
    }

    fn next_owned(&mut self) -> Result<Option<SequenceRecord<T>>> {
        while self.pending.is_empty() && !self.exhausted {
            self.refill_window()?;
        }
        Ok(self.pending.pop_front())
    }
}

impl<T: ElemType> SequenceRandomizer<T> for BlockRandomizer<T> {
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        config.validate()?;
        self.worker_rank = config.worker_rank;
        self.num_workers = config.num_workers;

        // The epoch index doubles as the permutation seed.
        self.rng = StdRng::seed_from_u64(config.epoch_index as u64);
        self.chunk_order = self.bundler.chunk_descriptions().iter().map(|c| c.id).collect();
        self.chunk_order.shuffle(&mut self.rng);

        self.window_size = self
            .window
            .unwrap_or(self.chunk_order.len())
            .clamp(1, self.chunk_order.len().max(1));
        self.next_window_start = 0;
        self.pending.clear();
        self.global_position = 0;
        self.remaining_budget = if config.epoch_size_in_samples == FULL_DATA_SWEEP {
            self.bundler.total_sample_count()
        } else {
            config.epoch_size_in_samples
        };
        self.exhausted = self.chunk_order.is_empty();

        if self.verbosity >= 2 {
            debug!(
                "Epoch {}: {} chunks, window {}, budget {} samples, worker {}/{}",
                config.epoch_index,
                self.chunk_order.len(),
                self.window_size,
                self.remaining_budget,
                self.worker_rank,
                self.num_workers
            );
        }
        Ok(())
    }

    fn next_sequences(&mut self, max_samples: usize) -> Result<SequenceBatch<T>> {
        let mut sequences = Vec::new();
        let mut samples = 0;

        while samples < max_samples {
            match self.next_owned()? {
                Some(sequence) => {
                    samples += sequence.num_samples();
                    sequences.push(sequence);
                }
                None => break,
            }
        }

        let end_of_epoch = self.exhausted && self.pending.is_empty();
        Ok(SequenceBatch {
            sequences,
            end_of_epoch,
        })
    }
}
