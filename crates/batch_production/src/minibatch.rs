//! The in-memory minibatch representation handed from packer to reader.

use crate::layout::BatchLayout;
use anyhow::{anyhow, Result};

/// Packed column-major buffer for one stream.
///
/// `data.len() == element_count(stream) * layout.num_cols()`; column `c`
/// occupies `data[c * ec .. (c + 1) * ec]`.
#[derive(Debug)]
pub struct StreamBatch<T> {
    pub stream_id: usize,
    pub data: Vec<T>,
}

/// One produced minibatch: per-stream packed buffers, the layout describing
/// their column structure, and the end-of-epoch flag.
///
/// The terminal batch of an epoch carries `end_of_epoch = true`; its streams
/// may be empty (nothing left) or hold a final partial batch.
#[derive(Debug)]
pub struct Minibatch<T> {
    pub streams: Vec<StreamBatch<T>>,
    pub layout: BatchLayout,
    pub end_of_epoch: bool,
}

impl<T> Minibatch<T> {
    /// The empty terminal batch.
    pub fn end_of_epoch() -> Self {
        Self {
            streams: Vec::new(),
            layout: BatchLayout::new(),
            end_of_epoch: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() || self.layout.num_cols() == 0
    }

    /// Stream buffers are ordered by stream id.
    pub fn stream(&self, stream_id: usize) -> Result<&StreamBatch<T>> {
        self.streams
            .get(stream_id)
            .filter(|s| s.stream_id == stream_id)
            .ok_or_else(|| anyhow!("Minibatch carries no stream with id {}", stream_id))
    }
}
