//! The sequence-source boundary.
//!
//! Format-specific decoding (archives, images, text) lives behind
//! [`SequenceSource`]; this crate only consumes the decoded records. The
//! in-memory [`MemorySource`] is the reference implementation, used by tests
//! and by callers whose data is already decoded.

use crate::sequences::{Chunk, ChunkDescription, ChunkId, SequenceId, SequenceRecord};
use crate::streams::StreamDescription;
use crate::ElemType;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A producer of raw sequence data, organized in chunks.
///
/// Implementations must be `Send`: the production half of the pipeline runs
/// on a background thread when prefetching is enabled.
pub trait SequenceSource<T: ElemType>: Send {
    /// Streams this source produces, ids local to the source (`0..n`).
    fn stream_descriptions(&self) -> &[Arc<StreamDescription>];

    /// Cheap catalog of all chunks, in source order.
    fn chunk_descriptions(&self) -> Vec<ChunkDescription>;

    /// Materializes one chunk.
    fn load_chunk(&self, chunk: ChunkId) -> Result<Chunk<T>>;

    /// Length in frames of the given sequence, if this source knows it.
    /// Used for cross-source consistency checking without materialization.
    fn sequence_length(&self, id: SequenceId) -> Option<usize>;

    /// Point lookup of a single sequence, used when this source is merged
    /// as a secondary behind another source's chunking.
    fn load_sequence(&self, id: SequenceId) -> Result<Option<SequenceRecord<T>>>;
}

/// A source backed by pre-decoded chunks held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource<T> {
    descriptions: Vec<Arc<StreamDescription>>,
    chunks: Vec<Chunk<T>>,
    // sequence id -> (chunk index, index within chunk)
    index: HashMap<SequenceId, (usize, usize)>,
}

impl<T: ElemType> MemorySource<T> {
    /// Builds a source from chunks, validating every payload against the
    /// declared stream shapes.
    pub fn new(descriptions: Vec<StreamDescription>, chunks: Vec<Chunk<T>>) -> Result<Self> {
        if descriptions.is_empty() {
            bail!("MemorySource requires at least one stream description");
        }

        let descriptions: Vec<Arc<StreamDescription>> =
            descriptions.into_iter().map(Arc::new).collect();

        let mut index = HashMap::new();
        for (chunk_pos, chunk) in chunks.iter().enumerate() {
            for (seq_pos, sequence) in chunk.sequences.iter().enumerate() {
                if sequence.payloads.len() != descriptions.len() {
                    bail!(
                        "Sequence {} carries {} payloads but {} streams are declared",
                        sequence.id,
                        sequence.payloads.len(),
                        descriptions.len()
                    );
                }
                for (stream, payload) in sequence.payloads.iter().enumerate() {
                    let expected = sequence.frames * descriptions[stream].element_count();
                    if payload.len() != expected {
                        bail!(
                            "Sequence {} stream '{}': payload has {} elements, expected {}",
                            sequence.id,
                            descriptions[stream].name,
                            payload.len(),
                            expected
                        );
                    }
                }
                if index.insert(sequence.id, (chunk_pos, seq_pos)).is_some() {
                    bail!("Duplicate sequence id {}", sequence.id);
                }
            }
        }

        Ok(Self {
            descriptions,
            chunks,
            index,
        })
    }
}

impl<T: ElemType> SequenceSource<T> for MemorySource<T> {
    fn stream_descriptions(&self) -> &[Arc<StreamDescription>] {
        &self.descriptions
    }

    fn chunk_descriptions(&self) -> Vec<ChunkDescription> {
        self.chunks
            .iter()
            .map(|chunk| ChunkDescription {
                id: chunk.id,
                sequence_count: chunk.sequences.len(),
                sample_count: chunk.sequences.iter().map(|s| s.frames).sum(),
            })
            .collect()
    }

    fn load_chunk(&self, chunk: ChunkId) -> Result<Chunk<T>> {
        match self.chunks.iter().find(|c| c.id == chunk) {
            Some(found) => Ok(found.clone()),
            None => bail!("Unknown chunk id {}", chunk),
        }
    }

    fn sequence_length(&self, id: SequenceId) -> Option<usize> {
        let &(chunk, seq) = self.index.get(&id)?;
        Some(self.chunks[chunk].sequences[seq].frames)
    }

    fn load_sequence(&self, id: SequenceId) -> Result<Option<SequenceRecord<T>>> {
        Ok(self
            .index
            .get(&id)
            .map(|&(chunk, seq)| self.chunks[chunk].sequences[seq].clone()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::streams::SampleShape;

    /// One-stream source: `chunks` of `seqs_per_chunk` sequences, each
    /// `frames` frames of a single element whose value encodes the sequence
    /// id. Sequence ids are assigned consecutively from 0.
    pub fn single_stream_source(
        chunks: usize,
        seqs_per_chunk: usize,
        frames: usize,
    ) -> MemorySource<f32> {
        let descriptions = vec![StreamDescription::new(
            0,
            "features",
            SampleShape::vector(1),
        )];

        let mut next_id: SequenceId = 0;
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

        MemorySource::new(descriptions, chunks).unwrap()
    }
}
