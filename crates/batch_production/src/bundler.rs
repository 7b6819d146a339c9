//! Bundling of independent sequence sources into one aligned stream.
//!
//! The first source drives chunking; every other source is joined in by
//! sequence id. Merged stream descriptions concatenate each source's
//! descriptions with ids renumbered for global uniqueness.

use crate::sequences::{Chunk, ChunkDescription, ChunkId, SequenceRecord};
use crate::source::SequenceSource;
use crate::streams::StreamDescription;
use crate::ElemType;
use anyhow::{bail, Result};
use log::warn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Bundler<T: ElemType> {
    sources: Vec<Box<dyn SequenceSource<T>>>,
    descriptions: Vec<Arc<StreamDescription>>,
    cross_check: bool,
    dropped_sequences: AtomicUsize,
}

impl<T: ElemType> Bundler<T> {
    /// Merges the sources' stream catalogs. With `cross_check` enabled,
    /// every delivered sequence's length is verified across all sources;
    /// mismatches are dropped with a warning. With it disabled, mismatches
    /// are undefined behavior by contract.
    pub fn new(sources: Vec<Box<dyn SequenceSource<T>>>, cross_check: bool) -> Result<Self> {
        if sources.is_empty() {
            bail!("Bundler requires at least one sequence source");
        }

        let mut descriptions = Vec::new();
        for source in &sources {
            for local in source.stream_descriptions() {
                let mut merged = (**local).clone();
                merged.id = descriptions.len();
                descriptions.push(Arc::new(merged));
            }
        }

        Ok(Self {
            sources,
            descriptions,
            cross_check,
            dropped_sequences: AtomicUsize::new(0),
        })
    }

    /// The merged stream descriptions, ids renumbered `0..n`.
    pub fn stream_descriptions(&self) -> &[Arc<StreamDescription>] {
        &self.descriptions
    }

    /// Chunk catalog of the bundled stream (the driver source's chunking).
    pub fn chunk_descriptions(&self) -> Vec<ChunkDescription> {
        self.sources[0].chunk_descriptions()
    }

    pub fn total_sample_count(&self) -> usize {
        self.chunk_descriptions()
            .iter()
            .map(|c| c.sample_count)
            .sum()
    }

    /// Sequences dropped so far by cross-checking or missing secondary data.
    pub fn dropped_sequence_count(&self) -> usize {
        self.dropped_sequences.load(Ordering::Relaxed)
    }

    /// Materializes one bundled chunk: the driver chunk with every
    /// sequence's payloads extended by the secondary sources, in merged
    /// stream order.
    pub fn load_chunk(&self, chunk: ChunkId) -> Result<Chunk<T>> {
        let driver_chunk = self.sources[0].load_chunk(chunk)?;
        if self.sources.len() == 1 {
            return Ok(driver_chunk);
        }

        let mut sequences = Vec::with_capacity(driver_chunk.sequences.len());
        'sequences: for mut sequence in driver_chunk.sequences {
            if self.cross_check && !self.lengths_agree(&sequence) {
                self.dropped_sequences.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            for (source_index, source) in self.sources.iter().enumerate().skip(1) {
                match source.load_sequence(sequence.id)? {
                    Some(secondary) => sequence.payloads.extend(secondary.payloads),
                    None => {
                        warn!(
                            "Sequence {} missing from source {}, dropping it",
                            sequence.id, source_index
                        );
                        self.dropped_sequences.fetch_add(1, Ordering::Relaxed);
                        continue 'sequences;
                    }
                }
            }
            sequences.push(sequence);
        }

        Ok(Chunk {
            id: driver_chunk.id,
            sequences,
        })
    }

    fn lengths_agree(&self, sequence: &SequenceRecord<T>) -> bool {
        for (source_index, source) in self.sources.iter().enumerate().skip(1) {
            let reported = source.sequence_length(sequence.id);
            if reported != Some(sequence.frames) {
                warn!(
                    "Sequence {}: source 0 reports {} frames but source {} reports {:?}, \
                     dropping it",
                    sequence.id, sequence.frames, source_index, reported
                );
                return false;
            }
        }
        true
    }
}
