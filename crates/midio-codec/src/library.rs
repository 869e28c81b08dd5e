use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use midio_core::error::{MidioError, Result};

use crate::format::Disc;

const DISC_EXTENSION: &str = "disc";

/// Summary row for `library list`.
#[derive(Debug, Clone, Serialize)]
pub struct DiscSummary {
    pub name: String,
    pub version: String,
    pub author: String,
    pub tracks: usize,
    pub auth_required: Vec<String>,
}

/// A local shelf of `.disc` files, one per disc name.
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    /// Open the library at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn disc_path(&self, name: &str) -> PathBuf {
        let safe = name.replace(['/', '\\'], "_");
        self.root.join(format!("{}.{}", safe, DISC_EXTENSION))
    }

    /// Write a disc under its metadata name.
    pub fn save(&self, disc: &Disc, overwrite: bool) -> Result<PathBuf> {
        let dest = self.disc_path(&disc.metadata.name);
        if dest.exists() && !overwrite {
            return Err(MidioError::DiscExists(disc.metadata.name.clone()));
        }
        fs::write(&dest, disc.to_json()?)?;
        info!(disc = %disc.metadata.name, path = %dest.display(), "Saved disc");
        Ok(dest)
    }

    pub fn load(&self, name: &str) -> Result<Disc> {
        let path = self.disc_path(name);
        if !path.exists() {
            return Err(MidioError::DiscNotFound(name.to_string()));
        }
        debug!(disc = %name, "Loading disc from library");
        load_file(&path)
    }

    /// Disc names on the shelf, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DISC_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Summaries of every readable disc. Corrupt files are skipped.
    pub fn list_detailed(&self) -> Result<Vec<DiscSummary>> {
        let mut out = Vec::new();
        for name in self.list()? {
            match self.load(&name) {
                Ok(disc) => out.push(DiscSummary {
                    name: disc.metadata.name.clone(),
                    version: disc.metadata.version.clone(),
                    author: disc.metadata.author.clone(),
                    tracks: disc.tracks.len(),
                    auth_required: disc
                        .auth_manifest()
                        .iter()
                        .map(|a| a.toolkit.clone())
                        .collect(),
                }),
                Err(e) => warn!(disc = %name, error = %e, "Skipping unreadable disc"),
            }
        }
        Ok(out)
    }

    /// Returns whether a disc was removed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.disc_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(disc = %name, "Removed disc");
        Ok(true)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.disc_path(name).exists()
    }

    /// Copy a disc file from anywhere onto the shelf.
    pub fn import(&self, file: &Path, overwrite: bool) -> Result<Disc> {
        let disc = load_file(file)?;
        self.save(&disc, overwrite)?;
        Ok(disc)
    }

    /// Write a shelved disc to `dest`. A directory destination gets
    /// `<name>.disc` inside it.
    pub fn export(&self, name: &str, dest: &Path) -> Result<PathBuf> {
        let disc = self.load(name)?;
        let dest = if dest.is_dir() {
            match self.disc_path(name).file_name() {
                Some(file) => dest.join(file),
                None => dest.to_path_buf(),
            }
        } else {
            dest.to_path_buf()
        };
        fs::write(&dest, disc.to_json()?)?;
        info!(disc = %name, path = %dest.display(), "Exported disc");
        Ok(dest)
    }
}

/// Read and verify a disc from an arbitrary path.
pub fn load_file(path: &Path) -> Result<Disc> {
    if !path.exists() {
        return Err(MidioError::DiscNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    Disc::from_json(&content)
}
