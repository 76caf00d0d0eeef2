use std::path::{Path, PathBuf};

use tracing::debug;

/// Picks a final output path that does not collide with anything on disk.
///
/// The check and the later write are not atomic: two jobs with the same
/// title can both be handed the same path.
#[derive(Debug, Clone)]
pub struct OutputPathAllocator {
    dir: PathBuf,
}

impl OutputPathAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<title>.<ext>`, else `<title>_1.<ext>`, `<title>_2.<ext>`, ...
    pub fn allocate(&self, title: &str, extension: &str) -> PathBuf {
        let candidate = self.dir.join(format!("{title}.{extension}"));
        if !exists(&candidate) {
            return candidate;
        }
        let mut counter = 1usize;
        loop {
            let candidate = self.dir.join(format!("{title}_{counter}.{extension}"));
            if !exists(&candidate) {
                return candidate;
            }
            debug!(path = %candidate.display(), "output path taken");
            counter += 1;
        }
    }
}

fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}
