pub mod bundler;
pub mod config;
pub mod layout;
pub mod minibatch;
pub mod packer;
pub mod randomizer;
pub mod reader;
pub mod sequences;
pub mod source;
pub mod streams;

pub use bundler::Bundler;
pub use config::ReaderConfig;
pub use layout::BatchLayout;
pub use minibatch::Minibatch;
pub use randomizer::{DecimationMode, EpochConfiguration, FULL_DATA_SWEEP};
pub use reader::{DeviceDescriptor, OutputBuffer, SessionReader};
pub use source::{MemorySource, SequenceSource};
pub use streams::{SampleShape, StorageKind, StreamDescription, StreamRegistry};

/// Numeric element type the pipeline is instantiated over.
///
/// Packed buffers, sequence payloads and caller-supplied output buffers all
/// share one element type per session. The pipeline itself never does
/// arithmetic on elements, so plain copy semantics are enough.
pub trait ElemType: Copy + Default + Send + Sync + 'static {}

impl ElemType for f32 {}
impl ElemType for f64 {}
