//! # wagate-media
//!
//! Object storage and the media pipeline: pull encrypted blobs through the
//! protocol client, park them in an S3-compatible bucket, and serve them back.

pub mod fetch;
pub mod keys;
pub mod object_store;
pub mod pipeline;
pub mod stream;

pub use fetch::{MediaFetcher, MediaSource, ResolvedMedia};
pub use object_store::{
    build_object_store, ensure_bucket_with_backoff, MemoryObjectStore, S3ObjectStore,
};
pub use pipeline::{BatchOutcome, MediaPipeline, SentMedia};
pub use stream::{is_local_url, stream_object, ProxiedObject};
