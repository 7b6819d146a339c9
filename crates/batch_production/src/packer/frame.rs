//! Flat-frame packing: every frame is an independent sample.

use super::{validate_against_streams, MemoryProvider, MinibatchPacker};
use crate::layout::BatchLayout;
use crate::minibatch::{Minibatch, StreamBatch};
use crate::randomizer::SequenceRandomizer;
use crate::sequences::SequenceRecord;
use crate::streams::StreamDescription;
use crate::ElemType;
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Packs frames one per column, ignoring sequence boundaries for layout
/// purposes beyond bookkeeping. Frames left over from a multi-frame sequence
/// carry into the next call, so batches stay exactly `minibatch_size` until
/// the epoch runs dry.
pub struct FramePacker<T: ElemType> {
    streams: Vec<Arc<StreamDescription>>,
    minibatch_size: usize,
    pending: VecDeque<SequenceRecord<T>>,
    front_offset: usize,
    pending_frames: usize,
    input_exhausted: bool,
}

impl<T: ElemType> FramePacker<T> {
    pub fn new(streams: Vec<Arc<StreamDescription>>, minibatch_size: usize) -> Self {
        Self {
            streams,
            minibatch_size,
            pending: VecDeque::new(),
            front_offset: 0,
            pending_frames: 0,
            input_exhausted: false,
        }
    }
}

impl<T: ElemType> MinibatchPacker<T> for FramePacker<T> {
    fn read_minibatch(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
        provider: &mut dyn MemoryProvider<T>,
    ) -> Result<Minibatch<T>> {
        while self.pending_frames < self.minibatch_size && !self.input_exhausted {
            let batch = input.next_sequences(self.minibatch_size - self.pending_frames)?;
            if batch.end_of_epoch {
                self.input_exhausted = true;
            }
            if batch.sequences.is_empty() {
                break;
            }
            for sequence in batch.sequences {
                validate_against_streams(&sequence, &self.streams)?;
                self.pending_frames += sequence.frames;
                self.pending.push_back(sequence);
            }
        }

        let columns = self.pending_frames.min(self.minibatch_size);
        if columns == 0 {
            return Ok(Minibatch::end_of_epoch());
        }

        let mut layout = BatchLayout::new();
        layout.init(columns, 1)?;

        let mut buffers: Vec<Vec<T>> = self
            .streams
            .iter()
            .map(|stream| provider.acquire(columns * stream.element_count()))
            .collect();

        for column in 0..columns {
            let sequence = match self.pending.front() {
                Some(sequence) => sequence,
                None => bail!("Frame accounting out of sync with pending sequences"),
            };
            let (id, frames) = (sequence.id, sequence.frames);

            for (stream_id, stream) in self.streams.iter().enumerate() {
                let ec = stream.element_count();
                let source = &sequence.payloads[stream_id]
                    [self.front_offset * ec..(self.front_offset + 1) * ec];
                buffers[stream_id][column * ec..(column + 1) * ec].copy_from_slice(source);
            }

            layout.add_sequence(id, column, 0, 1)?;
            self.front_offset += 1;
            self.pending_frames -= 1;
            if self.front_offset == frames {
                self.pending.pop_front();
                self.front_offset = 0;
            }
        }

        let streams = buffers
            .into_iter()
            .enumerate()
            .map(|(stream_id, data)| StreamBatch { stream_id, data })
            .collect();

        Ok(Minibatch {
            streams,
            layout,
            end_of_epoch: self.input_exhausted && self.pending_frames == 0,
        })
    }
}
