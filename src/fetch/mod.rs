//! The two fetch phases of a sync.
//!
//! - [`metadata`] turns package names into candidate units
//! - [`content`] downloads, verifies and commits those candidates

pub mod content;
pub mod metadata;

pub use content::ContentFetcher;
pub use metadata::{Discovery, MetadataFetcher, manifest_url, parse_manifest};
