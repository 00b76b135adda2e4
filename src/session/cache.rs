use crate::segmentation::Mask;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-session directory of mask PNGs, one file per history index
///
/// Mirrors the in-memory mask sequence: written on append, removed on undo,
/// wiped on upload. The session never reads it back to render; it exists so
/// masks can be picked up by other tools.
pub struct MaskCache {
    dir: PathBuf,
}

impl MaskCache {
    pub fn new<P: AsRef<Path>>(root: P, session_id: &str) -> Result<Self> {
        let dir = root.as_ref().join(session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create mask cache at {}", dir.display()))?;
        Ok(Self { dir })
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("mask_{index}.png"))
    }

    pub fn store(&self, index: usize, mask: &Mask) -> Result<PathBuf> {
        let path = self.path_for(index);
        mask.to_luma()
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn load(&self, index: usize) -> Result<Mask> {
        let path = self.path_for(index);
        let image = image::open(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .to_luma8();
        Ok(Mask::from_luma(&image))
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        let path = self.path_for(index);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Drop every cached mask, keeping the directory
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

impl Drop for MaskCache {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            tracing::debug!("Mask cache {} not removed: {}", self.dir.display(), e);
        }
    }
}
