//! Stored frame discovery

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Files in `dir` whose extension is in `extensions` (case-insensitive),
/// sorted by path. Subdirectories are not searched.
pub fn list_frames(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if matches {
            frames.push(path);
        }
    }
    frames.sort();
    debug!("Found {} stored frames in {}", frames.len(), dir.display());
    Ok(frames)
}
