//! Workbook build pipeline.
//!
//! This module turns discovered pages and blocks into a deployable worker
//! bundle: platform configuration, entry module generation, resolution
//! plugins, and the bundler backend.

pub mod build;
pub mod bundler;
pub mod config_gen;
pub mod diagnostics;
pub mod entry;
pub mod plugins;

pub use build::{BuildOptions, BuildResult, Builder, BUNDLE_FILE};
pub use bundler::{BundleOutcome, BundleRequest, Bundler, EsbuildBundler};
pub use diagnostics::{BuildError, BuildErrorKind, ErrorClassifier, EsbuildClassifier};
pub use entry::{Method, Route, RouteTarget};
