//! Discovery of the photograph to solve.

use std::io;
use std::path::{Path, PathBuf};

use log::debug;

/// Marker that a file name must contain, compared case-insensitively.
pub const INPUT_MARKER: &str = "starphoto";
/// Accepted image extensions.
pub const INPUT_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether a file name looks like an input photograph.
pub fn is_input_name(name: &str) -> bool {
    let name = name.to_lowercase();
    let Some((stem, extension)) = name.rsplit_once('.') else {
        return false;
    };
    stem.contains(INPUT_MARKER) && INPUT_EXTENSIONS.contains(&extension)
}

/// First matching photograph in `dir`, in file name order.
pub fn find_input_image(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()).is_some_and(is_input_name) {
            candidates.push(path);
        }
    }
    candidates.sort();
    debug!("Input candidates in {}: {candidates:?}", dir.display());
    Ok(candidates.into_iter().next())
}
