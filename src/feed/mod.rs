//! Streaming feed input.
//!
//! A property feed is a single large XML document with one element per
//! record. The reader is a pull parser: it materializes at most one record
//! subtree at a time, so feeds of hundreds of megabytes stream through a
//! bounded memory footprint.
//!
//! - [`XmlFeedSource`] reads `.xml` and gzip-compressed `.xml.gz` files
//! - [`SourceRecord`] is the immutable parsed unit handed downstream
//! - [`RecordSource`] is the seam the orchestrator consumes, so tests can
//!   substitute synthetic sources

pub mod reader;
pub mod source;

pub use reader::XmlFeedSource;
pub use source::{AgencyBlock, FeedError, MediaItem, RecordSource, SourceRecord};
