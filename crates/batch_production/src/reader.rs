//! The session orchestrator.
//!
//! Owns the bundled stream, the randomizer, the per-epoch packer and the
//! memory provider, drives the epoch lifecycle and keeps exactly one batch
//! worth of production in flight. With prefetch enabled the production runs
//! on a background thread; with it disabled the same single-slot interface
//! executes synchronously at the point the caller blocks.

use crate::bundler::Bundler;
use crate::config::ReaderConfig;
use crate::layout::BatchLayout;
use crate::minibatch::Minibatch;
use crate::packer::{
    FramePacker, HeapMemoryProvider, MemoryProvider, MinibatchPacker, SequencePacker,
};
use crate::randomizer::{
    BlockRandomizer, EpochConfiguration, PassthroughRandomizer, SequenceRandomizer,
};
use crate::streams::StreamRegistry;
use crate::ElemType;
use anyhow::{anyhow, bail, ensure, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Target device of a caller-supplied output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDescriptor {
    Cpu,
    Gpu(u32),
}

/// A caller-owned destination for one stream's packed data.
#[derive(Debug, Clone)]
pub struct OutputBuffer<T> {
    pub device: DeviceDescriptor,
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: ElemType> OutputBuffer<T> {
    pub fn new(device: DeviceDescriptor) -> Self {
        Self {
            device,
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Column-major packed data, `rows * cols` elements.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    fn assign(&mut self, rows: usize, cols: usize, source: &[T]) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.extend_from_slice(source);
    }
}

/// Everything the producer needs, shared between the consumer thread and the
/// background production thread. Epoch reconfiguration mutates this under
/// the lock, after joining any outstanding production.
struct ProductionState<T: ElemType> {
    randomizer: Box<dyn SequenceRandomizer<T>>,
    packer: Option<Box<dyn MinibatchPacker<T>>>,
    provider: HeapMemoryProvider<T>,
}

fn produce<T: ElemType>(state: &Mutex<ProductionState<T>>) -> Result<Minibatch<T>> {
    let mut guard = state
        .lock()
        .map_err(|_| anyhow!("Production state poisoned by an earlier panic"))?;
    let ProductionState {
        randomizer,
        packer,
        provider,
    } = &mut *guard;
    let packer = packer
        .as_mut()
        .ok_or_else(|| anyhow!("No epoch has been configured"))?;
    packer.read_minibatch(randomizer.as_mut(), provider)
}

/// The one-deep production pipeline: at most one task outstanding.
enum PrefetchSlot<T> {
    Idle,
    /// Background production, result pending in the single-slot channel.
    Running {
        rx: Receiver<Result<Minibatch<T>>>,
        handle: JoinHandle<()>,
    },
    /// Prefetch disabled: production deferred to the consumer's blocking
    /// point.
    Deferred,
}

/// The minibatch-production session.
pub struct SessionReader<T: ElemType> {
    registry: Arc<StreamRegistry>,
    state: Arc<Mutex<ProductionState<T>>>,
    slot: PrefetchSlot<T>,
    layout: BatchLayout,
    end_of_epoch: bool,
    prefetch: bool,
    frame_mode: bool,
    truncated: bool,
    parallel_sequences: Vec<usize>,
    verbosity: i32,
}

impl<T: ElemType> SessionReader<T> {
    /// Builds the session: bundles the sources, publishes the stream
    /// registry (all dense) and selects the randomizer variant.
    pub fn new(config: ReaderConfig<T>) -> Result<Self> {
        let ReaderConfig {
            parallel_sequences,
            prefetch,
            frame_mode,
            truncated,
            cross_check_data,
            verbosity,
            randomize,
            randomization_window,
            decimation,
            sources,
        } = config;

        ensure!(
            !sources.is_empty(),
            "Reader session requires at least one sequence source"
        );
        ensure!(
            !parallel_sequences.is_empty(),
            "parallel_sequences must name at least one epoch entry"
        );

        let bundler = Bundler::new(sources, cross_check_data)?;
        let registry = StreamRegistry::publish(bundler.stream_descriptions())?;

        let randomizer: Box<dyn SequenceRandomizer<T>> = if randomize {
            Box::new(BlockRandomizer::new(
                bundler,
                randomization_window,
                decimation,
                verbosity,
            ))
        } else {
            Box::new(PassthroughRandomizer::new(bundler))
        };

        let mut layout = BatchLayout::new();
        layout.init(parallel_sequences[0], 0)?;

        Ok(Self {
            registry: Arc::new(registry),
            state: Arc::new(Mutex::new(ProductionState {
                randomizer,
                packer: None,
                provider: HeapMemoryProvider::new(),
            })),
            slot: PrefetchSlot::Idle,
            layout,
            // No epoch configured yet: report "no data" until a loop starts.
            end_of_epoch: true,
            prefetch,
            frame_mode,
            truncated,
            parallel_sequences,
            verbosity,
        })
    }

    pub fn stream_registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Single-worker epoch start.
    pub fn start_minibatch_loop(
        &mut self,
        minibatch_size: usize,
        epoch: usize,
        epoch_size_in_samples: usize,
    ) -> Result<()> {
        self.start_distributed_minibatch_loop(minibatch_size, epoch, 0, 1, epoch_size_in_samples)
    }

    /// Reconfigures randomizer and packer for a new epoch and issues the
    /// first production task. Any outstanding read is joined first: epoch
    /// reconfiguration is a synchronization barrier.
    pub fn start_distributed_minibatch_loop(
        &mut self,
        minibatch_size: usize,
        epoch: usize,
        worker_rank: usize,
        num_workers: usize,
        epoch_size_in_samples: usize,
    ) -> Result<()> {
        let epoch_config = EpochConfiguration {
            worker_rank,
            num_workers,
            minibatch_size_in_samples: minibatch_size,
            epoch_size_in_samples,
            epoch_index: epoch,
        };
        epoch_config.validate()?;

        // Make sure there are no outstanding reads before touching state.
        self.join_outstanding();
        self.end_of_epoch = false;

        {
            let mut guard = self
                .state
                .lock()
                .map_err(|_| anyhow!("Production state poisoned by an earlier panic"))?;
            let ProductionState {
                randomizer, packer, ..
            } = &mut *guard;

            randomizer.start_epoch(&epoch_config)?;

            let streams = self.registry.streams().to_vec();
            let fresh: Box<dyn MinibatchPacker<T>> = if self.frame_mode {
                Box::new(FramePacker::new(streams, minibatch_size))
            } else {
                Box::new(SequencePacker::new(
                    streams,
                    minibatch_size,
                    self.parallel_sequences_for_epoch(epoch),
                    self.truncated,
                )?)
            };
            *packer = Some(fresh);
        }

        if self.verbosity >= 2 {
            debug!(
                "Epoch {}: worker {}/{}, minibatch size {}",
                epoch, worker_rank, num_workers, minibatch_size
            );
        }

        self.issue_production()
    }

    /// Delivers the next minibatch into the caller's buffers.
    ///
    /// Returns `Ok(false)` without touching the outstanding task once the
    /// epoch has ended, and on every call thereafter until the next loop
    /// start. Otherwise blocks on the single production slot, copies each
    /// requested stream (name to id through the registry), synchronizes the
    /// layout snapshot and re-issues the next production task before
    /// returning.
    pub fn get_minibatch(
        &mut self,
        outputs: &mut HashMap<String, OutputBuffer<T>>,
    ) -> Result<bool> {
        if self.end_of_epoch {
            return Ok(false);
        }

        // All output buffers of one call must target the same device; a
        // violation is a programming error, not a retryable condition.
        let mut device: Option<DeviceDescriptor> = None;
        for buffer in outputs.values() {
            match device {
                None => device = Some(buffer.device),
                Some(expected) => ensure!(
                    buffer.device == expected,
                    "Output buffers target mixed devices ({:?} vs {:?})",
                    expected,
                    buffer.device
                ),
            }
        }

        let minibatch = self.wait_production()?;

        if minibatch.end_of_epoch {
            self.end_of_epoch = true;
            if minibatch.is_empty() {
                return Ok(false);
            }
        }

        let has_data = !minibatch.is_empty();
        if has_data {
            self.layout.copy_from(&minibatch.layout);
            let cols = self.layout.num_cols();

            for (name, buffer) in outputs.iter_mut() {
                let stream_id = self
                    .registry
                    .id_of(name)
                    .ok_or_else(|| anyhow!("Unknown stream '{}'", name))?;
                let stream = self
                    .registry
                    .stream(stream_id)
                    .ok_or_else(|| anyhow!("Stream id {} missing from registry", stream_id))?;
                let rows = stream.element_count();

                let packed = minibatch.stream(stream_id)?;
                ensure!(
                    packed.data.len() == rows * cols,
                    "Stream '{}' packed {} elements, but the layout declares {} rows x {} cols",
                    name,
                    packed.data.len(),
                    rows,
                    cols
                );
                buffer.assign(rows, cols, &packed.data);
            }

            // Hand the packed buffers back for reuse.
            let mut guard = self
                .state
                .lock()
                .map_err(|_| anyhow!("Production state poisoned by an earlier panic"))?;
            for stream in minibatch.streams {
                guard.provider.release(stream.data);
            }
        }

        // Re-issue immediately: keep exactly one batch of pipeline depth.
        self.issue_production()?;
        Ok(has_data)
    }

    /// Copies the current layout snapshot into `dest`.
    pub fn copy_batch_layout_to(&self, dest: &mut BatchLayout) {
        dest.copy_from(&self.layout);
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.layout.num_parallel_sequences()
    }

    /// Legacy call kept for surface parity; the return value carries no
    /// meaning.
    pub fn data_end(&self) -> bool {
        false
    }

    fn parallel_sequences_for_epoch(&self, epoch: usize) -> usize {
        self.parallel_sequences
            .get(epoch)
            .or(self.parallel_sequences.last())
            .copied()
            .unwrap_or(1)
    }

    fn issue_production(&mut self) -> Result<()> {
        self.slot = if self.prefetch {
            let state = Arc::clone(&self.state);
            let (tx, rx) = bounded(1);
            let handle = thread::Builder::new()
                .name("minibatch-producer".to_string())
                .spawn(move || {
                    let _ = tx.send(produce(&state));
                })
                .context("Failed to spawn the minibatch producer thread")?;
            PrefetchSlot::Running { rx, handle }
        } else {
            PrefetchSlot::Deferred
        };
        Ok(())
    }

    /// Blocks on the outstanding slot and drains it exactly once.
    fn wait_production(&mut self) -> Result<Minibatch<T>> {
        match std::mem::replace(&mut self.slot, PrefetchSlot::Idle) {
            PrefetchSlot::Running { rx, handle } => {
                let received = rx.recv();
                let _ = handle.join();
                match received {
                    Ok(result) => result,
                    Err(_) => bail!("Producer thread terminated without delivering a minibatch"),
                }
            }
            PrefetchSlot::Deferred => produce(&self.state),
            PrefetchSlot::Idle => bail!("No production task outstanding"),
        }
    }

    /// Epoch barrier: waits for any outstanding production, discarding its
    /// result.
    fn join_outstanding(&mut self) {
        if let PrefetchSlot::Running { rx, handle } =
            std::mem::replace(&mut self.slot, PrefetchSlot::Idle)
        {
            let _ = rx.recv();
            let _ = handle.join();
        }
    }
}

impl<T: ElemType> Drop for SessionReader<T> {
    fn drop(&mut self) {
        self.join_outstanding();
    }
}
