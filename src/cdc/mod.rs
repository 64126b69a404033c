//! Change data capture: poll engine history, publish records, persist the
//! watermark.

pub mod checkpoint;
pub mod pipeline;
pub mod poller;
pub mod publisher;

pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use pipeline::{CycleSummary, Pipeline, PipelineState};
pub use poller::{PollBatch, Poller};
pub use publisher::{PublishReport, Publisher, Streams};
