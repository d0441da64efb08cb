//! Packing pipeline components: context, walk loop, readers, committer, transfer stage.

pub mod committer;
pub mod context;
pub mod error_handler;
pub mod orchestrator;
pub mod reader;
pub mod uploader;
pub mod walk;

pub use context::{Candidate, PackItem, PipelineContext, ReaderShared, create_pipeline_channels};
pub use orchestrator::{PackParams, run_pack_pipeline};
pub use uploader::{TransferJob, TransferOutcome};
pub use walk::run_walk_loop;
