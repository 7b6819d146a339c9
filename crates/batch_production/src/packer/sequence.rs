//! Sequence-preserving packing with parallel slots.

use super::{validate_against_streams, MemoryProvider, MinibatchPacker};
use crate::layout::BatchLayout;
use crate::minibatch::{Minibatch, StreamBatch};
use crate::randomizer::SequenceRandomizer;
use crate::sequences::SequenceRecord;
use crate::streams::StreamDescription;
use crate::ElemType;
use anyhow::{ensure, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// A sequence partially delivered by earlier truncated minibatches.
struct InFlight<T> {
    sequence: SequenceRecord<T>,
    consumed: usize,
}

/// Packs whole sequences into a grid of parallel slots, padding shorter
/// slots with explicit gaps.
///
/// In truncated mode each slot additionally carries its current sequence
/// across successive minibatches: spans start at a negative `begin` for the
/// frames already delivered and `end` past the grid for frames still to
/// come.
pub struct SequencePacker<T: ElemType> {
    streams: Vec<Arc<StreamDescription>>,
    minibatch_size: usize,
    parallel_sequences: usize,
    truncated: bool,
    queue: VecDeque<SequenceRecord<T>>,
    slots: Vec<Option<InFlight<T>>>,
    input_exhausted: bool,
}

impl<T: ElemType> SequencePacker<T> {
    pub fn new(
        streams: Vec<Arc<StreamDescription>>,
        minibatch_size: usize,
        parallel_sequences: usize,
        truncated: bool,
    ) -> Result<Self> {
        ensure!(
            parallel_sequences > 0,
            "Sequence packing requires at least one parallel slot"
        );
        let slots = (0..parallel_sequences).map(|_| None).collect();
        Ok(Self {
            streams,
            minibatch_size,
            parallel_sequences,
            truncated,
            queue: VecDeque::new(),
            slots,
            input_exhausted: false,
        })
    }

    fn copy_frames(
        &self,
        buffers: &mut [Vec<T>],
        layout: &BatchLayout,
        sequence: &SequenceRecord<T>,
        from_frame: usize,
        slot: usize,
        first_step: usize,
        count: usize,
    ) {
        for (stream_id, stream) in self.streams.iter().enumerate() {
            let ec = stream.element_count();
            for step in 0..count {
                let source_frame = from_frame + step;
                let column = layout.column_index(slot, first_step + step);
                let source = &sequence.payloads[stream_id][source_frame * ec..(source_frame + 1) * ec];
                buffers[stream_id][column * ec..(column + 1) * ec].copy_from_slice(source);
            }
        }
    }

    fn into_minibatch(
        &self,
        buffers: Vec<Vec<T>>,
        layout: BatchLayout,
        end_of_epoch: bool,
    ) -> Minibatch<T> {
        let streams = buffers
            .into_iter()
            .enumerate()
            .map(|(stream_id, data)| StreamBatch { stream_id, data })
            .collect();
        Minibatch {
            streams,
            layout,
            end_of_epoch,
        }
    }

    fn acquire_buffers(
        &self,
        provider: &mut dyn MemoryProvider<T>,
        columns: usize,
    ) -> Vec<Vec<T>> {
        self.streams
            .iter()
            .map(|stream| provider.acquire(columns * stream.element_count()))
            .collect()
    }

    /// Refills the local queue from the randomizer and pops one sequence.
    fn next_sequence(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
    ) -> Result<Option<SequenceRecord<T>>> {
        while self.queue.is_empty() && !self.input_exhausted {
            let batch = input.next_sequences(1)?;
            if batch.end_of_epoch {
                self.input_exhausted = true;
            }
            if batch.sequences.is_empty() {
                break;
            }
            for sequence in batch.sequences {
                validate_against_streams(&sequence, &self.streams)?;
                self.queue.push_back(sequence);
            }
        }
        Ok(self.queue.pop_front())
    }

    /// Whole-utterance packing: one randomizer pull per minibatch, each
    /// sequence placed in the least-loaded slot.
    fn read_whole(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
        provider: &mut dyn MemoryProvider<T>,
    ) -> Result<Minibatch<T>> {
        let batch = input.next_sequences(self.minibatch_size)?;
        if batch.end_of_epoch {
            self.input_exhausted = true;
        }
        if batch.sequences.is_empty() {
            return Ok(Minibatch::end_of_epoch());
        }
        for sequence in &batch.sequences {
            validate_against_streams(sequence, &self.streams)?;
        }

        let mut occupancy = vec![0usize; self.parallel_sequences];
        let placements: Vec<(usize, usize)> = batch
            .sequences
            .iter()
            .map(|sequence| {
                let slot = occupancy
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, used)| *used)
                    .map(|(slot, _)| slot)
                    .unwrap_or(0);
                let begin = occupancy[slot];
                occupancy[slot] += sequence.frames;
                (slot, begin)
            })
            .collect();

        let time_steps = occupancy.iter().max().copied().unwrap_or(0);
        let mut layout = BatchLayout::new();
        layout.init(self.parallel_sequences, time_steps)?;
        let mut buffers = self.acquire_buffers(provider, self.parallel_sequences * time_steps);

        for (sequence, &(slot, begin)) in batch.sequences.iter().zip(&placements) {
            self.copy_frames(&mut buffers, &layout, sequence, 0, slot, begin, sequence.frames);
            layout.add_sequence(
                sequence.id,
                slot,
                begin as isize,
                (begin + sequence.frames) as isize,
            )?;
        }
        for (slot, &used) in occupancy.iter().enumerate() {
            if used < time_steps {
                layout.add_gap(slot, used, time_steps)?;
            }
        }

        Ok(self.into_minibatch(buffers, layout, batch.end_of_epoch))
    }

    /// Truncated packing: a fixed-width grid, every slot continuing its
    /// in-flight sequence from where the previous minibatch left off.
    fn read_truncated(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
        provider: &mut dyn MemoryProvider<T>,
    ) -> Result<Minibatch<T>> {
        let time_steps = (self.minibatch_size / self.parallel_sequences).max(1);

        for slot in 0..self.parallel_sequences {
            if self.slots[slot].is_none() {
                if let Some(sequence) = self.next_sequence(input)? {
                    self.slots[slot] = Some(InFlight {
                        sequence,
                        consumed: 0,
                    });
                }
            }
        }
        if self.slots.iter().all(Option::is_none) {
            return Ok(Minibatch::end_of_epoch());
        }

        let mut layout = BatchLayout::new();
        layout.init(self.parallel_sequences, time_steps)?;
        let mut buffers = self.acquire_buffers(provider, self.parallel_sequences * time_steps);

        for slot in 0..self.parallel_sequences {
            let (emitted, finished) = match &self.slots[slot] {
                None => {
                    layout.add_gap(slot, 0, time_steps)?;
                    continue;
                }
                Some(in_flight) => {
                    let remaining = in_flight.sequence.frames - in_flight.consumed;
                    let emitted = remaining.min(time_steps);
                    self.copy_frames(
                        &mut buffers,
                        &layout,
                        &in_flight.sequence,
                        in_flight.consumed,
                        slot,
                        0,
                        emitted,
                    );
                    let begin = -(in_flight.consumed as isize);
                    let end = begin + in_flight.sequence.frames as isize;
                    layout.add_sequence(in_flight.sequence.id, slot, begin, end)?;
                    if emitted < time_steps {
                        layout.add_gap(slot, emitted, time_steps)?;
                    }
                    (emitted, emitted == remaining)
                }
            };

            if let Some(in_flight) = self.slots[slot].as_mut() {
                in_flight.consumed += emitted;
            }
            if finished {
                self.slots[slot] = None;
            }
        }

        let drained = self.input_exhausted
            && self.queue.is_empty()
            && self.slots.iter().all(Option::is_none);
        Ok(self.into_minibatch(buffers, layout, drained))
    }
}

impl<T: ElemType> MinibatchPacker<T> for SequencePacker<T> {
    fn read_minibatch(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
        provider: &mut dyn MemoryProvider<T>,
    ) -> Result<Minibatch<T>> {
        if self.truncated {
            self.read_truncated(input, provider)
        } else {
            self.read_whole(input, provider)
        }
    }
}

#[cfg(test)]
mod sequence_packer_tests {
    use super::*;
    use crate::packer::test_support::{one_stream, sequence, ScriptedRandomizer};
    use crate::packer::HeapMemoryProvider;

    fn read_all(
        packer: &mut SequencePacker<f32>,
        input: &mut ScriptedRandomizer,
    ) -> Vec<Minibatch<f32>> {
        let mut provider = HeapMemoryProvider::new();
        let mut batches = Vec::new();
        loop {
            let batch = packer.read_minibatch(input, &mut provider).unwrap();
            let done = batch.end_of_epoch;
            batches.push(batch);
            if done {
                return batches;
            }
        }
    }

    #[test]
    fn whole_mode_pads_short_slots_with_gaps() -> Result<()> {
        let mut packer = SequencePacker::new(one_stream(1), 10, 2, false)?;
        let mut input = ScriptedRandomizer::new(vec![sequence(0, 3, 1), sequence(1, 2, 1)]);

        let batches = read_all(&mut packer, &mut input);
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.layout.num_parallel_sequences(), 2);
        assert_eq!(batch.layout.num_time_steps(), 3);
        assert_eq!(batch.layout.num_cols(), 6);
        assert_eq!(batch.layout.num_valid_samples(), 5);
        assert_eq!(batch.stream(0)?.data.len(), 6);
        assert_eq!(batch.layout.gaps().len(), 1);
        assert!(batch.end_of_epoch);
        Ok(())
    }

    #[test]
    fn whole_mode_places_values_step_major() -> Result<()> {
        let mut packer = SequencePacker::new(one_stream(1), 10, 2, false)?;
        let mut input = ScriptedRandomizer::new(vec![sequence(1, 2, 1), sequence(2, 2, 1)]);

        let batches = read_all(&mut packer, &mut input);
        // Slots alternate within each step: [s0@t0, s1@t0, s0@t1, s1@t1].
        assert_eq!(batches[0].stream(0)?.data, vec![1.0, 2.0, 1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn truncated_mode_carries_a_sequence_across_batches() -> Result<()> {
        let mut packer = SequencePacker::new(one_stream(1), 2, 1, true)?;
        let mut input = ScriptedRandomizer::new(vec![sequence(5, 5, 1)]);

        let batches = read_all(&mut packer, &mut input);
        assert_eq!(batches.len(), 3);

        let spans: Vec<(isize, isize)> = batches
            .iter()
            .map(|b| {
                let span = b.layout.spans()[0];
                (span.begin, span.end)
            })
            .collect();
        assert_eq!(spans, vec![(0, 5), (-2, 3), (-4, 1)]);

        // Final batch emits the last frame and pads the second step.
        assert_eq!(batches[2].layout.num_valid_samples(), 1);
        assert!(batches[2].end_of_epoch);
        Ok(())
    }

    #[test]
    fn truncated_mode_fills_idle_slots_with_gaps() -> Result<()> {
        let mut packer = SequencePacker::new(one_stream(1), 4, 2, true)?;
        let mut input = ScriptedRandomizer::new(vec![sequence(0, 2, 1)]);

        let batches = read_all(&mut packer, &mut input);
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.layout.num_parallel_sequences(), 2);
        assert_eq!(batch.layout.num_time_steps(), 2);
        // Slot 1 never had work: a full-width gap.
        assert_eq!(batch.layout.num_valid_samples(), 2);
        Ok(())
    }

    #[test]
    fn rejects_zero_parallel_sequences() {
        assert!(SequencePacker::<f32>::new(one_stream(1), 4, 0, false).is_err());
    }
}
