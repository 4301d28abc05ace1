//! Collision-free destination naming

use crate::organizer::MoveOperation;
use crate::organizer::classifier::Classifier;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// True if any directory entry, including a dangling symlink, sits at `path`
pub fn is_occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Return `desired` if nothing occupies it, otherwise the first free
/// `stem_N.ext` for N = 1, 2, 3, ...
///
/// The check is not atomic with the move that follows; the mover refuses to
/// overwrite, so a lost race surfaces as a failed move rather than data loss.
pub fn resolve_unique(desired: &Path) -> PathBuf {
    resolve_unique_with(desired, |_| false)
}

/// Like [`resolve_unique`], also treating every path for which `reserved`
/// returns true as taken.
pub fn resolve_unique_with<F>(desired: &Path, reserved: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let taken = |candidate: &Path| is_occupied(candidate) || reserved(candidate);

    if !taken(desired) {
        return desired.to_path_buf();
    }

    let parent = desired.parent().unwrap_or_else(|| Path::new(""));
    let stem = desired.file_stem().map(OsString::from).unwrap_or_default();
    let extension = desired.extension();

    let mut counter: u64 = 1;
    loop {
        let mut name = stem.clone();
        name.push(format!("_{counter}"));
        if let Some(extension) = extension {
            name.push(".");
            name.push(extension);
        }

        let candidate = parent.join(name);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Classify `source` and pair it with a free path in its category directory.
/// Returns `None` for unmanaged files.
pub fn plan_move<F>(classifier: &Classifier, source: &Path, reserved: F) -> Option<MoveOperation>
where
    F: Fn(&Path) -> bool,
{
    let category = classifier.classify(source)?;
    let file_name = source.file_name()?;
    let destination = resolve_unique_with(&category.directory.join(file_name), reserved);

    Some(MoveOperation::new(source, destination))
}
