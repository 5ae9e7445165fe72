//! Generated platform configuration (`wrangler.toml`).
//!
//! The output is a pure function of the manifest, so rebuilding an
//! unchanged workbook rewrites identical bytes.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::Manifest;

/// File name of the generated platform configuration.
pub const CONFIG_FILE: &str = "wrangler.toml";

const HEADER: &str = "# Generated by hands. Do not edit.\n\n";

#[derive(Debug, Serialize)]
struct PlatformConfig<'a> {
    name: &'a str,
    main: &'a str,
    compatibility_date: &'a str,
    compatibility_flags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    triggers: Option<Triggers>,
}

#[derive(Debug, Serialize)]
struct Triggers {
    crons: Vec<String>,
}

/// Render the platform configuration for `manifest`.
///
/// `main` is the bundle path relative to the configuration file. The
/// trigger list holds one entry per distinct schedule of an enabled source.
pub fn generate_config(manifest: &Manifest, main: &str) -> Result<String> {
    let crons = manifest.cron_triggers();
    let config = PlatformConfig {
        name: &manifest.name,
        main,
        compatibility_date: &manifest.build.compatibility_date,
        compatibility_flags: &manifest.build.compatibility_flags,
        triggers: (!crons.is_empty()).then_some(Triggers { crons }),
    };

    let body = toml::to_string(&config).context("failed to serialize platform configuration")?;
    Ok(format!("{}{}", HEADER, body))
}
