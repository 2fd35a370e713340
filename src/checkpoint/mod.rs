//! Hourly checkpoint archival
//!
//! Drains a shard's durable tier into self-indexing per-(tenant, hour)
//! files and hands them to the upload collaborator:
//!
//! - **codec**: the footer-indexed binary file format, writer and reader
//! - **upload**: per-hour orchestration across tenants and shards, with the
//!   admission-window watermark
//! - **error**: error types

pub mod codec;
pub mod error;
pub mod upload;

pub use codec::{
    write_checkpoint, CheckpointReader, CheckpointSummary, PathHourData, PathOffsets,
};
pub use error::{CheckpointError, CheckpointResult};
pub use upload::{
    CheckpointUploader, FileNodeStateRegistry, LocalPathRegistry, NodeStateRegistry, PathRegistry,
    Uploader,
};
