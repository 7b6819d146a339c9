//! Session configuration for the reader.
//!
//! `ReaderConfig` stores the recognized options with their defaults.
//!
//! Example:
//! ```ignore
//! let config = ReaderConfig::builder()
//!     .source(Box::new(source))
//!     .randomize(true)
//!     .randomization_window(8)
//!     .frame_mode(false)
//!     .truncated(true)
//!     .parallel_sequences(vec![4, 8])
//!     .build();
//! let reader = SessionReader::new(config)?;
//! ```

use crate::randomizer::DecimationMode;
use crate::source::SequenceSource;
use crate::ElemType;

/// Configuration for one reader session.
pub struct ReaderConfig<T: ElemType> {
    /// Parallel sequence slots per epoch index; later epochs clamp to the
    /// last entry. Only consulted in sequence mode.
    pub parallel_sequences: Vec<usize>,
    /// Overlap production with consumption on a background thread. When
    /// disabled, production is deferred and runs synchronously at the point
    /// the caller blocks on it.
    pub prefetch: bool,
    /// Frame mode packs every frame as an independent sample; sequence mode
    /// preserves sequence continuity across slots.
    pub frame_mode: bool,
    /// In sequence mode, carry truncated sequences across successive
    /// minibatches instead of packing whole utterances.
    pub truncated: bool,
    /// Verify per-sequence lengths across sources, dropping mismatches.
    pub cross_check_data: bool,
    /// Diagnostic chattiness; higher is noisier.
    pub verbosity: i32,
    /// Shuffle the stream per epoch (windowed block shuffle) instead of
    /// delivering it in source order.
    pub randomize: bool,
    /// Randomization window in chunks; `None` means the entire dataset.
    pub randomization_window: Option<usize>,
    /// How the ordered stream is partitioned across distributed workers.
    pub decimation: DecimationMode,
    /// The sequence sources to bundle, first source drives the chunking.
    pub sources: Vec<Box<dyn SequenceSource<T>>>,
}

impl<T: ElemType> Default for ReaderConfig<T> {
    fn default() -> Self {
        Self {
            parallel_sequences: vec![1],
            prefetch: true,
            frame_mode: true,
            truncated: false,
            cross_check_data: false,
            verbosity: 2,
            randomize: false,
            randomization_window: None,
            decimation: DecimationMode::Chunk,
            sources: Vec::new(),
        }
    }
}

impl<T: ElemType> ReaderConfig<T> {
    pub fn builder() -> ReaderConfigBuilder<T> {
        ReaderConfigBuilder::default()
    }

    /// Parallel-slot count for the given epoch, clamped to the last entry.
    pub fn parallel_sequences_for_epoch(&self, epoch: usize) -> usize {
        self.parallel_sequences
            .get(epoch)
            .or(self.parallel_sequences.last())
            .copied()
            .unwrap_or(1)
    }
}

/// Builder for [`ReaderConfig`] with method chaining.
pub struct ReaderConfigBuilder<T: ElemType> {
    config: ReaderConfig<T>,
}

impl<T: ElemType> Default for ReaderConfigBuilder<T> {
    fn default() -> Self {
        Self {
            config: ReaderConfig::default(),
        }
    }
}

impl<T: ElemType> ReaderConfigBuilder<T> {
    pub fn parallel_sequences(mut self, per_epoch: Vec<usize>) -> Self {
        self.config.parallel_sequences = per_epoch;
        self
    }

    pub fn prefetch(mut self, prefetch: bool) -> Self {
        self.config.prefetch = prefetch;
        self
    }

    pub fn frame_mode(mut self, frame_mode: bool) -> Self {
        self.config.frame_mode = frame_mode;
        self
    }

    pub fn truncated(mut self, truncated: bool) -> Self {
        self.config.truncated = truncated;
        self
    }

    pub fn cross_check_data(mut self, cross_check: bool) -> Self {
        self.config.cross_check_data = cross_check;
        self
    }

    pub fn verbosity(mut self, verbosity: i32) -> Self {
        self.config.verbosity = verbosity;
        self
    }

    pub fn randomize(mut self, randomize: bool) -> Self {
        self.config.randomize = randomize;
        self
    }

    /// Set the randomization window in chunks. Unset = entire dataset.
    pub fn randomization_window(mut self, chunks: usize) -> Self {
        self.config.randomization_window = Some(chunks);
        self
    }

    pub fn decimation(mut self, mode: DecimationMode) -> Self {
        self.config.decimation = mode;
        self
    }

    /// Appends one sequence source. The first source added drives chunking.
    pub fn source(mut self, source: Box<dyn SequenceSource<T>>) -> Self {
        self.config.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: Vec<Box<dyn SequenceSource<T>>>) -> Self {
        self.config.sources = sources;
        self
    }

    pub fn build(self) -> ReaderConfig<T> {
        self.config
    }
}
