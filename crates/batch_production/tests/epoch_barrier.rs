//! Epoch reconfiguration as a synchronization barrier.
//!
//! Tests cover:
//! - Starting a new loop while an asynchronous read is outstanding blocks
//!   until that read completes
//! - The epoch following the barrier delivers clean, complete data

mod common;
use common::{feature_source, SlowSource};

use anyhow::Result;
use batch_production::{
    DeviceDescriptor, OutputBuffer, ReaderConfig, SessionReader, FULL_DATA_SWEEP,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[test]
fn loop_start_waits_for_the_outstanding_read() -> Result<()> {
    let delay = Duration::from_millis(50);
    let config = ReaderConfig::builder()
        .source(Box::new(SlowSource {
            inner: feature_source(1, 10, 1),
            delay,
        }))
        .build();
    let mut reader = SessionReader::new(config)?;

    let begin = Instant::now();
    // The first loop start eagerly launches a background read, which stalls
    // inside the source for `delay`.
    reader.start_minibatch_loop(4, 0, FULL_DATA_SWEEP)?;
    // Reconfiguring must join that read before touching shared state.
    reader.start_minibatch_loop(4, 1, FULL_DATA_SWEEP)?;
    assert!(
        begin.elapsed() >= delay,
        "the barrier must wait for the in-flight production"
    );

    // The new epoch is intact: full delivery, usual batch sizes.
    let mut outputs = HashMap::from([(
        "features".to_string(),
        OutputBuffer::new(DeviceDescriptor::Cpu),
    )]);
    let mut sizes = Vec::new();
    while reader.get_minibatch(&mut outputs)? {
        sizes.push(outputs["features"].cols());
    }
    assert_eq!(sizes, vec![4, 4, 2]);
    Ok(())
}
