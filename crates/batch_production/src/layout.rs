//! Batch layout bookkeeping.
//!
//! A [`BatchLayout`] describes how samples are arranged inside a packed
//! buffer: a grid of `parallel_sequences` slots by `time_steps` columns per
//! slot, a span per packed sequence, and explicit gap spans for padding.
//! It is re-derivable from any [`crate::minibatch::Minibatch`] at any time
//! and can be copied into caller-held snapshots.

use anyhow::{ensure, Result};
use crate::sequences::SequenceId;

/// Placement of one sequence within the batch grid.
///
/// Times are in batch-local steps. `begin` is negative for a sequence whose
/// first `-begin` frames were already delivered in earlier batches; `end` may
/// exceed the batch's `time_steps` for a sequence that continues into the
/// next batch. The columns actually occupied in *this* batch are
/// `begin.max(0) .. end.min(time_steps)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpan {
    pub id: SequenceId,
    pub slot: usize,
    pub begin: isize,
    pub end: isize,
}

/// A run of unoccupied (padding) columns in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapSpan {
    pub slot: usize,
    pub begin: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchLayout {
    parallel_sequences: usize,
    time_steps: usize,
    spans: Vec<SequenceSpan>,
    gaps: Vec<GapSpan>,
}

impl BatchLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the layout to an empty `slots x steps` grid.
    pub fn init(&mut self, parallel_sequences: usize, time_steps: usize) -> Result<()> {
        ensure!(
            parallel_sequences > 0,
            "Batch layout requires at least one parallel slot"
        );
        self.parallel_sequences = parallel_sequences;
        self.time_steps = time_steps;
        self.spans.clear();
        self.gaps.clear();
        Ok(())
    }

    pub fn add_sequence(
        &mut self,
        id: SequenceId,
        slot: usize,
        begin: isize,
        end: isize,
    ) -> Result<()> {
        ensure!(
            slot < self.parallel_sequences,
            "Slot {} out of range for {} parallel sequences",
            slot,
            self.parallel_sequences
        );
        ensure!(end > begin, "Empty sequence span for sequence {}", id);
        ensure!(
            begin < self.time_steps as isize && end > 0,
            "Sequence {} span [{}, {}) lies outside the {}-step batch",
            id,
            begin,
            end,
            self.time_steps
        );
        self.spans.push(SequenceSpan {
            id,
            slot,
            begin,
            end,
        });
        Ok(())
    }

    pub fn add_gap(&mut self, slot: usize, begin: usize, end: usize) -> Result<()> {
        ensure!(
            slot < self.parallel_sequences,
            "Gap slot {} out of range for {} parallel sequences",
            slot,
            self.parallel_sequences
        );
        ensure!(
            begin < end && end <= self.time_steps,
            "Gap [{}, {}) lies outside the {}-step batch",
            begin,
            end,
            self.time_steps
        );
        self.gaps.push(GapSpan { slot, begin, end });
        Ok(())
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.parallel_sequences
    }

    pub fn num_time_steps(&self) -> usize {
        self.time_steps
    }

    /// Total column count of every packed buffer described by this layout,
    /// i.e. the sum of per-slot sample capacities.
    pub fn num_cols(&self) -> usize {
        self.parallel_sequences * self.time_steps
    }

    /// Columns carrying real data (total minus gap padding).
    pub fn num_valid_samples(&self) -> usize {
        let padding: usize = self.gaps.iter().map(|g| g.end - g.begin).sum();
        self.num_cols() - padding
    }

    /// Buffer column of `(slot, step)`: packed buffers are step-major, all
    /// slots of step 0 first, then step 1, and so on.
    pub fn column_index(&self, slot: usize, step: usize) -> usize {
        step * self.parallel_sequences + slot
    }

    pub fn spans(&self) -> &[SequenceSpan] {
        &self.spans
    }

    pub fn gaps(&self) -> &[GapSpan] {
        &self.gaps
    }

    /// Synchronizes this layout from another one.
    pub fn copy_from(&mut self, other: &BatchLayout) {
        self.parallel_sequences = other.parallel_sequences;
        self.time_steps = other.time_steps;
        self.spans.clone_from(&other.spans);
        self.gaps.clone_from(&other.gaps);
    }
}
