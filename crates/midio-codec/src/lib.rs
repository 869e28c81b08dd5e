//! # Codec
//!
//! The `.disc` format: a portable JSON description of a loom.
//! Burning turns a loom into a disc; loading hydrates a disc back into a
//! loom.
//! Nodes are identified by name on a disc; runtime ids are reassigned on
//! every load.

pub mod decoder;
pub mod encoder;
pub mod format;
pub mod library;

pub use decoder::{load, load_with, LoadMode};
pub use encoder::{burn, toolkit_for};
pub use format::{AuthRequirement, Disc, DiscMetadata, Track, TrackLink, FORMAT_VERSION};
pub use library::{load_file, DiscSummary, Library};
