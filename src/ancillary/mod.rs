//! Ancillary reference-data resolution and staging.

pub mod resolver;

pub use resolver::{AncillaryResolver, CommandRetriever, NoopRetriever, Retriever};
