//! Stream descriptions and the per-session stream registry.
//!
//! A *stream* is one named column of data every sequence carries (e.g.
//! `"features"`, `"labels"`). Descriptions are published once when the
//! session is initialized and are immutable afterwards; everything downstream
//! holds them behind `Arc`.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// How a stream's per-sample data is stored.
///
/// Sources may report either kind; the packed minibatches produced by this
/// crate are always dense, and the registry re-marks every published stream
/// accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Dense,
    SparseCsc,
}

/// Shape of a single sample (one frame) of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleShape {
    dims: Vec<usize>,
}

impl SampleShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Shorthand for a flat vector sample.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of elements one sample occupies in a packed buffer.
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Immutable description of one data stream.
#[derive(Debug, Clone)]
pub struct StreamDescription {
    /// Stable numeric id, unique within the session.
    pub id: usize,
    /// Unique stream name, used by callers to request data.
    pub name: String,
    pub storage: StorageKind,
    pub sample_shape: SampleShape,
}

impl StreamDescription {
    pub fn new(id: usize, name: impl Into<String>, sample_shape: SampleShape) -> Self {
        Self {
            id,
            name: name.into(),
            storage: StorageKind::Dense,
            sample_shape,
        }
    }

    pub fn element_count(&self) -> usize {
        self.sample_shape.element_count()
    }
}

/// Catalog of the session's streams, published once at initialization.
///
/// Ids index directly into the stream list; names resolve through a lookup
/// map. All entries are re-marked [`StorageKind::Dense`] on publication since
/// that is the only representation the packers emit.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: Vec<Arc<StreamDescription>>,
    by_name: HashMap<String, usize>,
}

impl StreamRegistry {
    pub fn publish(descriptions: &[Arc<StreamDescription>]) -> Result<Self> {
        let mut streams = Vec::with_capacity(descriptions.len());
        let mut by_name = HashMap::with_capacity(descriptions.len());

        for (expected_id, description) in descriptions.iter().enumerate() {
            if description.id != expected_id {
                bail!(
                    "Stream '{}' has id {} but occupies registry position {}",
                    description.name,
                    description.id,
                    expected_id
                );
            }
            if by_name
                .insert(description.name.clone(), description.id)
                .is_some()
            {
                bail!("Duplicate stream name '{}'", description.name);
            }

            let mut dense = (**description).clone();
            dense.storage = StorageKind::Dense;
            streams.push(Arc::new(dense));
        }

        Ok(Self { streams, by_name })
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn stream(&self, id: usize) -> Option<&Arc<StreamDescription>> {
        self.streams.get(id)
    }

    pub fn streams(&self) -> &[Arc<StreamDescription>] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
