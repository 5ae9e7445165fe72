//! Workbook - a project directory and its manifest.
//!
//! A Workbook provides centralized access to the project's paths and its
//! stable identity. The manifest snapshot it holds is replaced wholesale
//! on reload, never edited in place.

use std::path::{Path, PathBuf};

use crate::core::manifest::{Manifest, ManifestError, MANIFEST_NAME};
use crate::util::fs::normalize_path;
use crate::util::hash::short_path_hash;

/// Directory under the workbook root reserved for runtime state.
pub const STATE_DIR: &str = ".hands";

/// Lockfile name inside [`STATE_DIR`].
pub const LOCKFILE_NAME: &str = "runtime.lock";

/// A workbook rooted at a directory containing `hands.toml`.
#[derive(Debug, Clone)]
pub struct Workbook {
    root: PathBuf,
    id: String,
    manifest: Manifest,
}

impl Workbook {
    /// Open the workbook at `root`, loading its manifest.
    pub fn open(root: &Path) -> Result<Self, ManifestError> {
        let root = normalize_path(root);
        let manifest = Manifest::load(&root.join(MANIFEST_NAME))?;
        let id = workbook_id(&manifest.name, &root);
        Ok(Workbook { root, id, manifest })
    }

    /// Reload the manifest from disk, returning the new snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub fn reload(&mut self) -> Result<&Manifest, ManifestError> {
        let manifest = Manifest::load(&self.manifest_path())?;
        self.manifest = manifest;
        Ok(&self.manifest)
    }

    /// Stable identifier: manifest name plus a hash of the canonical root.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_NAME)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join(&self.manifest.pages)
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.root.join(&self.manifest.blocks)
    }

    /// Root of all generated output.
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.manifest.build.out_dir)
    }

    /// Generated config, entry module, and bundle.
    pub fn build_dir(&self) -> PathBuf {
        self.out_dir().join("build")
    }

    /// Database cluster directory.
    pub fn database_dir(&self) -> PathBuf {
        self.out_dir().join("postgres")
    }

    /// The runtime lockfile. Always at a fixed location so external tools
    /// can find it without reading the manifest.
    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.root)
    }

    /// Project-local tool configuration.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("config.toml")
    }
}

/// Lockfile location for a workbook root.
pub fn lock_path_for(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(LOCKFILE_NAME)
}

fn workbook_id(name: &str, root: &Path) -> String {
    format!("{}-{}", name, short_path_hash(root))
}
