//! Packing of the ordered sequence stream into dense minibatch buffers.
//!
//! Two packers, selected per epoch by the reader: the flat-frame packer for
//! frame mode and the sequence-preserving packer for everything else. Both
//! draw scratch buffers from a [`MemoryProvider`].

mod frame;
mod sequence;

pub use frame::FramePacker;
pub use sequence::SequencePacker;

use crate::minibatch::Minibatch;
use crate::randomizer::SequenceRandomizer;
use crate::sequences::SequenceRecord;
use crate::streams::StreamDescription;
use crate::ElemType;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Scratch-buffer supplier for the packers, owned by the session.
pub trait MemoryProvider<T: ElemType>: Send {
    /// Hands out a buffer of exactly `len` default-initialized elements.
    fn acquire(&mut self, len: usize) -> Vec<T>;

    /// Returns a buffer for reuse.
    fn release(&mut self, buffer: Vec<T>);
}

/// Heap-backed provider keeping a free list of returned buffers.
#[derive(Debug, Default)]
pub struct HeapMemoryProvider<T> {
    free: Vec<Vec<T>>,
}

impl<T> HeapMemoryProvider<T> {
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }
}

impl<T: ElemType> MemoryProvider<T> for HeapMemoryProvider<T> {
    fn acquire(&mut self, len: usize) -> Vec<T> {
        match self.free.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(len, T::default());
                buffer
            }
            None => vec![T::default(); len],
        }
    }

    fn release(&mut self, buffer: Vec<T>) {
        self.free.push(buffer);
    }
}

/// Assembles minibatches of the requested size from a randomizer's stream.
pub trait MinibatchPacker<T: ElemType>: Send {
    fn read_minibatch(
        &mut self,
        input: &mut dyn SequenceRandomizer<T>,
        provider: &mut dyn MemoryProvider<T>,
    ) -> Result<Minibatch<T>>;
}

/// A sequence whose payload disagrees with the declared stream layout is a
/// fatal configuration error, never a silent truncation.
pub(crate) fn validate_against_streams<T: ElemType>(
    sequence: &SequenceRecord<T>,
    streams: &[Arc<StreamDescription>],
) -> Result<()> {
    if sequence.payloads.len() != streams.len() {
        bail!(
            "Sequence {} carries {} streams but the session declares {}",
            sequence.id,
            sequence.payloads.len(),
            streams.len()
        );
    }
    for (stream, payload) in streams.iter().zip(&sequence.payloads) {
        let expected = sequence.frames * stream.element_count();
        if payload.len() != expected {
            bail!(
                "Stream '{}': sequence {} packs {} elements but the declared \
                 per-sample element count {} requires {}",
                stream.name,
                sequence.id,
                payload.len(),
                stream.element_count(),
                expected
            );
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sequences::SequenceBatch;
    use crate::streams::SampleShape;
    use std::collections::VecDeque;

    /// Replays a fixed list of sequences, greedy up to the requested sample
    /// count, exactly like a real randomizer would.
    pub struct ScriptedRandomizer {
        pending: VecDeque<SequenceRecord<f32>>,
    }

    impl ScriptedRandomizer {
        pub fn new(sequences: Vec<SequenceRecord<f32>>) -> Self {
            Self {
                pending: sequences.into(),
            }
        }
    }

    impl SequenceRandomizer<f32> for ScriptedRandomizer {
        fn start_epoch(&mut self, _config: &crate::randomizer::EpochConfiguration) -> Result<()> {
            Ok(())
        }

        fn next_sequences(&mut self, max_samples: usize) -> Result<SequenceBatch<f32>> {
            let mut sequences = Vec::new();
            let mut samples = 0;
            while samples < max_samples {
                match self.pending.pop_front() {
                    Some(sequence) => {
                        samples += sequence.num_samples();
                        sequences.push(sequence);
                    }
                    None => break,
                }
            }
            Ok(SequenceBatch {
                end_of_epoch: self.pending.is_empty(),
                sequences,
            })
        }
    }

    pub fn one_stream(element_count: usize) -> Vec<Arc<StreamDescription>> {
        vec![Arc::new(StreamDescription::new(
            0,
            "features",
            SampleShape::vector(element_count),
        ))]
    }

    /// A sequence whose stream-0 payload holds `id` repeated.
    pub fn sequence(id: u64, frames: usize, element_count: usize) -> SequenceRecord<f32> {
        SequenceRecord {
            id,
            chunk: 0,
            frames,
            payloads: vec![vec![id as f32; frames * element_count]],
        }
    }
}

#[cfg(test)]
mod provider_tests {
    use super::*;

    #[test]
    fn acquire_returns_default_filled_buffers() {
        let mut provider = HeapMemoryProvider::<f32>::new();
        let mut buffer = provider.acquire(4);
        assert_eq!(buffer, vec![0.0; 4]);

        buffer[0] = 7.0;
        provider.release(buffer);

        // Reused buffers must come back clean, whatever their former size.
        let again = provider.acquire(2);
        assert_eq!(again, vec![0.0; 2]);
    }

    #[test]
    fn mismatched_payload_is_fatal() {
        let streams = test_support::one_stream(3);
        let mut bad = test_support::sequence(0, 2, 3);
        bad.payloads[0].pop();
        assert!(validate_against_streams(&bad, &streams).is_err());
    }
}
