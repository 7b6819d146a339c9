use batch_production::sequences::{Chunk, SequenceRecord};
use batch_production::{MemorySource, SampleShape, SequenceSource, StreamDescription};

use anyhow::Result;
use std::time::Duration;

/// One-stream source of single-element frames; each frame's value encodes
/// the sequence id. Ids run consecutively from 0 across chunks.
pub fn feature_source(chunks: usize, seqs_per_chunk: usize, frames: usize) -> MemorySource<f32> {
    let descriptions = vec![StreamDescription::new(0, "features", SampleShape::vector(1))];

    let mut next_id = 0u64;
    let chunks = (0..chunks)
        .map(|chunk_id| {
            let sequences = (0..seqs_per_chunk)
                .map(|_| {
                    let id = next_id;
                    next_id += 1;
                    SequenceRecord {
                        id,
                        chunk: chunk_id,
                        frames,
                        payloads: vec![vec![id as f32; frames]],
                    }
                })
                .collect();
            Chunk {
                id: chunk_id,
                sequences,
            }
        })
        .collect();

    MemorySource::new(descriptions, chunks).expect("valid test source")
}

/// Single-chunk, one-stream source with explicit `(id, frames)` entries.
pub fn source_with_lengths(stream_name: &str, lengths: &[(u64, usize)]) -> MemorySource<f32> {
    let descriptions = vec![StreamDescription::new(0, stream_name, SampleShape::vector(1))];
    let sequences = lengths
        .iter()
        .map(|&(id, frames)| SequenceRecord {
            id,
            chunk: 0,
            frames,
            payloads: vec![vec![id as f32; frames]],
        })
        .collect();
    MemorySource::new(descriptions, vec![Chunk { id: 0, sequences }]).expect("valid test source")
}

/// Wraps a source so every chunk load takes at least `delay`; used to hold
/// a background production task in flight.
pub struct SlowSource {
    pub inner: MemorySource<f32>,
    pub delay: Duration,
}

impl SequenceSource<f32> for SlowSource {
    fn stream_descriptions(&self) -> &[std::sync::Arc<StreamDescription>] {
        self.inner.stream_descriptions()
    }

    fn chunk_descriptions(&self) -> Vec<batch_production::sequences::ChunkDescription> {
        self.inner.chunk_descriptions()
    }

    fn load_chunk(&self, chunk: usize) -> Result<Chunk<f32>> {
        std::thread::sleep(self.delay);
        self.inner.load_chunk(chunk)
    }

    fn sequence_length(&self, id: u64) -> Option<usize> {
        self.inner.sequence_length(id)
    }

    fn load_sequence(&self, id: u64) -> Result<Option<SequenceRecord<f32>>> {
        self.inner.load_sequence(id)
    }
}
