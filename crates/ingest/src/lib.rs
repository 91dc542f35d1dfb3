//! Ingestion and upload pipeline
//!
//! Accepts an arbitrary JSON document, stages it on local disk, and hands
//! it to the remote object store using a client obtained from the
//! credential lifecycle manager. The staged file is a transient artifact:
//! deleted once the remote store holds the durable copy, retained when an
//! attempted upload fails so the payload can be inspected and retried.

pub mod drive;
pub mod error;
pub mod pipeline;
pub mod staging;

pub use drive::{DriveClient, UploadedFile};
pub use error::IngestError;
pub use pipeline::{IngestOutcome, IngestPipeline};
pub use staging::{StagedFile, StagingArea, is_empty_payload};
