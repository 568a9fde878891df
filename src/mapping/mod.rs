//! Transformation of parsed feed records into target-store entities.
//!
//! All magic feed ids live in [`tables`]; [`RecordMapper`] is pure and
//! infallible; [`MappedEntity`] is the strongly-typed result handed to the
//! persistence adapter.

pub mod entity;
pub mod mapper;
pub mod tables;

pub use entity::{GalleryItem, MappedEntity, MAX_EXTENSION_FIELDS};
pub use mapper::RecordMapper;
