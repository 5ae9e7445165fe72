//! Hands - a local development runtime for workbooks
//!
//! This crate provides the core library functionality for Hands,
//! including workbook discovery, bundling, and supervision of the
//! database, worker, and data-source sync services.

pub mod builder;
pub mod core;
pub mod ops;
pub mod runtime;
pub mod util;

pub use core::{manifest::Manifest, workbook::Workbook};
pub use runtime::state::{init_runtime, RuntimeState};
pub use util::context::GlobalContext;
