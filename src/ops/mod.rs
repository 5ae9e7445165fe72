//! High-level operations.
//!
//! This module contains the implementation of Hands commands.

pub mod check;
pub mod clean;
pub mod dev;
pub mod hands_build;
pub mod status;
pub mod sync;

pub use check::{check, format_report, CheckOptions, CheckReport, CheckResult};
pub use clean::{clean, CleanOptions};
pub use dev::{dev, DevOptions};
pub use hands_build::{build, format_build};
pub use status::{format_status, status, RunState, StatusReport};
pub use sync::sync_source;
