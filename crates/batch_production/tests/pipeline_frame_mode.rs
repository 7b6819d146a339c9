//! Frame-mode pipeline tests.
//!
//! Tests cover:
//! - Batch sizing over a full epoch (10 sequences, minibatch 4 → 4, 4, 2)
//! - "No data" exactly once per epoch, sticky until the next loop start
//! - Row/column contracts of the delivered buffers against the layout
//! - Layout snapshots via `copy_batch_layout_to`
//! - Multi-source bundling end to end

mod common;
use common::{feature_source, source_with_lengths};

use anyhow::Result;
use batch_production::{
    BatchLayout, DeviceDescriptor, OutputBuffer, ReaderConfig, SessionReader, FULL_DATA_SWEEP,
};
use std::collections::HashMap;

fn cpu_outputs(names: &[&str]) -> HashMap<String, OutputBuffer<f32>> {
    names
        .iter()
        .map(|&name| (name.to_string(), OutputBuffer::new(DeviceDescriptor::Cpu)))
        .collect()
}

#[test]
fn epoch_of_ten_frames_packs_as_4_4_2() -> Result<()> {
    let config = ReaderConfig::builder()
        .source(Box::new(feature_source(1, 10, 1)))
        .build();
    let mut reader = SessionReader::new(config)?;
    reader.start_minibatch_loop(4, 0, FULL_DATA_SWEEP)?;

    let mut outputs = cpu_outputs(&["features"]);
    let mut sizes = Vec::new();
    while reader.get_minibatch(&mut outputs)? {
        sizes.push(outputs["features"].cols());
    }
    assert_eq!(sizes, vec![4, 4, 2]);
    Ok(())
}

#[test]
fn no_data_is_sticky_until_the_next_loop() -> Result<()> {
    let config = ReaderConfig::builder()
        .source(Box::new(feature_source(1, 3, 1)))
        .build();
    let mut reader = SessionReader::new(config)?;
    reader.start_minibatch_loop(4, 0, FULL_DATA_SWEEP)?;

    let mut outputs = cpu_outputs(&["features"]);
    assert!(reader.get_minibatch(&mut outputs)?);
    assert!(!reader.get_minibatch(&mut outputs)?);
    for _ in 0..3 {
        assert!(!reader.get_minibatch(&mut outputs)?);
    }

    // A new epoch delivers again.
    reader.start_minibatch_loop(4, 1, FULL_DATA_SWEEP)?;
    assert!(reader.get_minibatch(&mut outputs)?);
    Ok(())
}

#[test]
fn buffers_obey_the_declared_rows_and_layout_cols() -> Result<()> {
    // 6 sequences of 2 frames each, 3 elements per sample.
    let config = ReaderConfig::builder()
        .source(Box::new({
            use batch_production::sequences::{Chunk, SequenceRecord};
            use batch_production::{MemorySource, SampleShape, StreamDescription};

            let descriptions =
                vec![StreamDescription::new(0, "features", SampleShape::vector(3))];
            let sequences = (0..6u64)
                .map(|id| SequenceRecord {
                    id,
                    chunk: 0,
                    frames: 2,
                    payloads: vec![vec![id as f32; 6]],
                })
                .collect();
            MemorySource::new(descriptions, vec![Chunk { id: 0, sequences }])?
        }))
        .build();
    let mut reader = SessionReader::new(config)?;
    reader.start_minibatch_loop(5, 0, FULL_DATA_SWEEP)?;

    let mut outputs = cpu_outputs(&["features"]);
    let mut layout = BatchLayout::new();
    let mut total_samples = 0;
    while reader.get_minibatch(&mut outputs)? {
        let buffer = &outputs["features"];
        reader.copy_batch_layout_to(&mut layout);

        assert_eq!(buffer.rows(), 3);
        assert_eq!(buffer.cols(), layout.num_cols());
        assert_eq!(buffer.data().len(), buffer.rows() * buffer.cols());
        // Frame mode: one step, every column a valid sample.
        assert_eq!(layout.num_time_steps(), 1);
        assert_eq!(layout.num_valid_samples(), layout.num_cols());
        total_samples += layout.num_cols();
    }
    assert_eq!(total_samples, 12);
    Ok(())
}

#[test]
fn bundled_sources_deliver_aligned_columns() -> Result<()> {
    let config = ReaderConfig::builder()
        .source(Box::new(source_with_lengths(
            "features",
            &[(0, 1), (1, 1), (2, 1), (3, 1)],
        )))
        .source(Box::new(source_with_lengths(
            "labels",
            &[(0, 1), (1, 1), (2, 1), (3, 1)],
        )))
        .build();
    let mut reader = SessionReader::new(config)?;

    assert_eq!(reader.stream_registry().id_of("features"), Some(0));
    assert_eq!(reader.stream_registry().id_of("labels"), Some(1));

    reader.start_minibatch_loop(2, 0, FULL_DATA_SWEEP)?;

    let mut outputs = cpu_outputs(&["features", "labels"]);
    while reader.get_minibatch(&mut outputs)? {
        // Both sources encode the sequence id, so the columns must agree.
        assert_eq!(outputs["features"].data(), outputs["labels"].data());
        assert_eq!(outputs["features"].cols(), 2);
    }
    Ok(())
}
