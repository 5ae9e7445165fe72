//! Core data structures for Hands.
//!
//! This module contains the foundational types used throughout Hands:
//! - The `hands.toml` manifest and its data-source schedules
//! - Workbook identity and project paths
//! - Page and block discovery

pub mod discovery;
pub mod manifest;
pub mod schedule;
pub mod workbook;

pub use discovery::{discover, DiscoveredBlock, DiscoveredPage, Discovery, DiscoveryError};
pub use manifest::{Manifest, ManifestError, SourceConfig, MANIFEST_NAME};
pub use schedule::Schedule;
pub use workbook::{lock_path_for, Workbook, LOCKFILE_NAME, STATE_DIR};
