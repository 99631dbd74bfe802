//! Data model shared by the pipeline, strategies and catalog

pub mod metadata;
pub mod path;
mod record;

pub use metadata::{decode_record, encode_metadata, MetadataBlob, SkipReason};
pub use record::*;
