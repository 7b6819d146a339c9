//! Source-order delivery without randomization.

use super::{EpochConfiguration, SequenceRandomizer, FULL_DATA_SWEEP};
use crate::bundler::Bundler;
use crate::sequences::{ChunkId, SequenceBatch, SequenceRecord};
use crate::ElemType;
use anyhow::Result;
use std::collections::VecDeque;

/// Delivers chunks and sequences exactly in source order, independent of the
/// epoch index. Worker decimation is round-robin by sequence position, the
/// epoch sample budget is charged at the global cursor, so worker subsets
/// stay disjoint and union-complete.
pub struct PassthroughRandomizer<T: ElemType> {
    bundler: Bundler<T>,
    chunk_order: Vec<ChunkId>,

    // Epoch cursor state, reset by `start_epoch`.
    worker_rank: usize,
    num_workers: usize,
    next_chunk: usize,
    pending: VecDeque<SequenceRecord<T>>,
    global_position: usize,
    remaining_budget: usize,
    exhausted: bool,
}

impl<T: ElemType> PassthroughRandomizer<T> {
    pub fn new(bundler: Bundler<T>) -> Self {
        let chunk_order = bundler.chunk_descriptions().iter().map(|c| c.id).collect();
        Self {
            bundler,
            chunk_order,
            worker_rank: 0,
            num_workers: 1,
            next_chunk: 0,
            pending: VecDeque::new(),
            global_position: 0,
            remaining_budget: 0,
            exhausted: true,
        }
    }

    pub fn bundler(&self) -> &Bundler<T> {
        &self.bundler
    }

    /// Loads chunks until this worker owns at least one pending sequence or
    /// the epoch is exhausted.
    fn refill(&mut self) -> Result<()> {
        while self.pending.is_empty() && !self.exhausted {
            if self.next_chunk >= self.chunk_order.len() {
                self.exhausted = true;
                break;
            }
            let chunk = self.bundler.load_chunk(self.chunk_order[self.next_chunk])?;
            self.next_chunk += 1;

            for sequence in chunk.sequences {
                if self.remaining_budget == 0 {
                    self.exhausted = true;
                    break;
                }
                self.remaining_budget = self.remaining_budget.saturating_sub(sequence.frames);

                let owned = self.global_position % self.num_workers == self.worker_rank;
                self.global_position += 1;
                if owned {
                    self.pending.push_back(sequence);
                }
            }
        }
        Ok(())
    }

    fn next_owned(&mut self) -> Result<Option<SequenceRecord<T>>> {
        if self.pending.is_empty() {
            self.refill()?;
        }
        Ok(self.pending.pop_front())
    }
}

impl<T: ElemType> SequenceRandomizer<T> for PassthroughRandomizer<T> {
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        config.validate()?;
        self.worker_rank = config.worker_rank;
        self.num_workers = config.num_workers;
        self.next_chunk = 0;
        self.pending.clear();
        self.global_position = 0;
        self.remaining_budget = if config.epoch_size_in_samples == FULL_DATA_SWEEP {
            self.bundler.total_sample_count()
        } else {
            config.epoch_size_in_samples
        };
        self.exhausted = false;
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
