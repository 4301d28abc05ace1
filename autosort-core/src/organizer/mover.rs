//! Single-file relocation: atomic rename on one volume, copy-then-delete across volumes

use crate::organizer::resolver::is_occupied;
use crate::organizer::{MoveMethod, MoveOperation, MoveOutcome};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Why a single move failed
#[derive(Debug, Error)]
pub enum MoveError {
    /// Usually a duplicate event for a file that was already moved
    #[error("source no longer exists")]
    SourceVanished,

    #[error("source is a directory")]
    NotAFile,

    #[error("destination {} is already occupied", .0.display())]
    DestinationOccupied(PathBuf),

    #[error("destination directory {} does not exist", .0.display())]
    DestinationParentMissing(PathBuf),

    #[error("copy to {} failed: {source}", .destination.display())]
    CopyFailed { destination: PathBuf, source: io::Error },

    #[error("copied to {} but could not remove the source: {source}", .destination.display())]
    RemoveSource { destination: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl MoveError {
    /// Expected outcome of racing triggers for the same file; not worth alarming anyone
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::SourceVanished)
    }

    fn from_io(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound { Self::SourceVanished } else { Self::Io(error) }
    }
}

/// Decides whether a source file and a destination directory share a volume
pub trait VolumeProbe: Send + Sync + fmt::Debug {
    fn same_volume(&self, source: &Path, destination_dir: &Path) -> io::Result<bool>;
}

/// Compares device ids from file metadata
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceIdProbe;

impl VolumeProbe for DeviceIdProbe {
    #[cfg(unix)]
    fn same_volume(&self, source: &Path, destination_dir: &Path) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        Ok(fs::metadata(source)?.dev() == fs::metadata(destination_dir)?.dev())
    }

    #[cfg(not(unix))]
    fn same_volume(&self, source: &Path, destination_dir: &Path) -> io::Result<bool> {
        let source = fs::canonicalize(source)?;
        let destination_dir = fs::canonicalize(destination_dir)?;

        Ok(source.components().next() == destination_dir.components().next())
    }
}

/// Relocates files; never returns an error past its boundary, only outcomes
#[derive(Debug, Clone)]
pub struct Mover {
    probe: Arc<dyn VolumeProbe>,
}

impl Default for Mover {
    fn default() -> Self {
        Self::new()
    }
}

impl Mover {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(DeviceIdProbe))
    }

    pub fn with_probe(probe: Arc<dyn VolumeProbe>) -> Self {
        Self { probe }
    }

    /// Move one file, reporting success or the cause of failure
    pub fn relocate(&self, operation: &MoveOperation) -> MoveOutcome {
        match self.try_relocate(&operation.source, &operation.destination) {
            Ok(method) => MoveOutcome::Moved {
                source: operation.source.clone(),
                destination: operation.destination.clone(),
                method,
            },
            Err(error) => MoveOutcome::Failed { source: operation.source.clone(), error },
        }
    }

    fn try_relocate(&self, source: &Path, destination: &Path) -> Result<MoveMethod, MoveError> {
        let metadata = fs::symlink_metadata(source).map_err(MoveError::from_io)?;
        if metadata.is_dir() {
            return Err(MoveError::NotAFile);
        }

        if is_occupied(destination) {
            // A sibling trigger that won the race both took the name and the source
            if !is_occupied(source) {
                return Err(MoveError::SourceVanished);
            }
            return Err(MoveError::DestinationOccupied(destination.to_path_buf()));
        }

        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(MoveError::DestinationParentMissing(parent.to_path_buf()));
        }

        if self.probe.same_volume(source, parent).map_err(MoveError::from_io)? {
            fs::rename(source, destination).map_err(MoveError::from_io)?;
            Ok(MoveMethod::Rename)
        } else {
            copy_then_delete(source, destination)?;
            Ok(MoveMethod::CopyDelete)
        }
    }
}

/// Copy into a freshly created destination, then delete the source.
///
/// The destination is opened with `create_new`, so two copies can never write
/// to the same file, and only a file created by this call is removed again. A
/// failed copy leaves the source untouched; a failed delete removes the copy
/// so the file never exists twice.
fn copy_then_delete(source: &Path, destination: &Path) -> Result<(), MoveError> {
    let mut reader = File::open(source).map_err(MoveError::from_io)?;

    let mut writer = match OpenOptions::new().write(true).create_new(true).open(destination) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            return Err(MoveError::DestinationOccupied(destination.to_path_buf()));
        }
        Err(error) => {
            let destination = destination.to_path_buf();
            return Err(MoveError::CopyFailed { destination, source: error });
        }
    };

    let copied = io::copy(&mut reader, &mut writer)
        .and_then(|_| reader.metadata())
        .and_then(|metadata| writer.set_permissions(metadata.permissions()))
        .and_then(|()| writer.sync_all());
    drop(writer);

    if let Err(error) = copied {
        discard(destination);
        return Err(MoveError::CopyFailed { destination: destination.to_path_buf(), source: error });
    }

    if let Err(error) = fs::remove_file(source) {
        discard(destination);
        if error.kind() == io::ErrorKind::NotFound {
            return Err(MoveError::SourceVanished);
        }
        let destination = destination.to_path_buf();
        return Err(MoveError::RemoveSource { destination, source: error });
    }

    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    /// Pretends every destination lives on another volume
    #[derive(Debug)]
    struct ForeignVolume;

    impl VolumeProbe for ForeignVolume {
        fn same_volume(&self, _source: &Path, _destination_dir: &Path) -> io::Result<bool> {
            Ok(false)
        }
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let music = dir.path().join("Music");
        fs::create_dir(&inbox).unwrap();
        fs::create_dir(&music).unwrap();
        (dir, inbox, music)
    }

    #[test]
    fn test_same_volume_rename() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "la la").unwrap();

        let outcome = Mover::new().relocate(&MoveOperation::new(&source, music.join("song.mp3")));

        match outcome {
            MoveOutcome::Moved { destination, method, .. } => {
                assert_eq!(destination, music.join("song.mp3"));
                assert_eq!(method, MoveMethod::Rename);
            }
            other => panic!("expected a move, got {:?}", other),
        }
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(music.join("song.mp3")).unwrap(), "la la");
    }

    #[test]
    fn test_cross_volume_copy_then_delete() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "la la").unwrap();

        let mover = Mover::with_probe(Arc::new(ForeignVolume));
        let outcome = mover.relocate(&MoveOperation::new(&source, music.join("song.mp3")));

        assert!(outcome.is_moved());
        assert!(matches!(outcome, MoveOutcome::Moved { method: MoveMethod::CopyDelete, .. }));
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(music.join("song.mp3")).unwrap(), "la la");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_copy_leaves_source_untouched() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "keep me").unwrap();

        // A file name longer than NAME_MAX cannot be created
        let destination = music.join(format!("{}.mp3", "x".repeat(300)));
        let mover = Mover::with_probe(Arc::new(ForeignVolume));
        let outcome = mover.relocate(&MoveOperation::new(&source, &destination));

        match outcome {
            MoveOutcome::Failed { error: MoveError::CopyFailed { .. }, .. } => {}
            other => panic!("expected a copy failure, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&source).unwrap(), "keep me");
        assert_eq!(fs::read_dir(&music).unwrap().count(), 0);
    }

    #[test]
    fn test_second_attempt_reports_vanished_source() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "la la").unwrap();
        let mover = Mover::new();

        let first = mover.relocate(&MoveOperation::new(&source, music.join("song.mp3")));
        let second = mover.relocate(&MoveOperation::new(&source, music.join("song_1.mp3")));

        assert!(first.is_moved());
        assert!(second.is_benign_failure());
        assert!(!music.join("song_1.mp3").exists());
    }

    #[test]
    fn test_never_overwrites_an_occupied_destination() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "new").unwrap();
        fs::write(music.join("song.mp3"), "old").unwrap();

        let outcome = Mover::new().relocate(&MoveOperation::new(&source, music.join("song.mp3")));

        assert!(matches!(
            outcome,
            MoveOutcome::Failed { error: MoveError::DestinationOccupied(_), .. }
        ));
        assert!(!outcome.is_benign_failure());
        assert_eq!(fs::read_to_string(music.join("song.mp3")).unwrap(), "old");
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
    }

    #[test]
    fn test_missing_destination_parent() {
        let (dir, inbox, _music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "la la").unwrap();

        let outcome = Mover::new()
            .relocate(&MoveOperation::new(&source, dir.path().join("Gone").join("song.mp3")));

        assert!(matches!(
            outcome,
            MoveOutcome::Failed { error: MoveError::DestinationParentMissing(_), .. }
        ));
        assert!(source.exists());
    }

    #[test]
    fn test_refuses_directories() {
        let (_dir, inbox, music) = setup();
        let nested = inbox.join("album.mp3");
        fs::create_dir(&nested).unwrap();

        let outcome = Mover::new().relocate(&MoveOperation::new(&nested, music.join("album.mp3")));

        assert!(matches!(outcome, MoveOutcome::Failed { error: MoveError::NotAFile, .. }));
        assert!(nested.is_dir());
    }

    /// Cross-volume probe that holds each caller until both have arrived
    #[derive(Debug)]
    struct Rendezvous {
        barrier: Barrier,
    }

    impl VolumeProbe for Rendezvous {
        fn same_volume(&self, _source: &Path, _destination_dir: &Path) -> io::Result<bool> {
            self.barrier.wait();
            Ok(false)
        }
    }

    #[test]
    fn test_racing_cross_volume_copies_keep_the_file() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        let destination = music.join("song.mp3");
        fs::write(&source, "only copy").unwrap();

        let mover = Mover::with_probe(Arc::new(Rendezvous { barrier: Barrier::new(2) }));
        let operation = MoveOperation::new(&source, &destination);

        // Both attempts pass the occupancy check before either starts copying
        let outcomes: Vec<MoveOutcome> = thread::scope(|scope| {
            let attempts: Vec<_> =
                (0..2).map(|_| scope.spawn(|| mover.relocate(&operation))).collect();
            attempts.into_iter().map(|attempt| attempt.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_moved()).count(), 1);
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "only copy");
        assert_eq!(fs::read_dir(&music).unwrap().count(), 1);
    }

    #[test]
    fn test_cross_volume_copy_never_overwrites() {
        let (_dir, inbox, music) = setup();
        let source = inbox.join("song.mp3");
        fs::write(&source, "new").unwrap();

        // Occupy the destination after the planning checks have run
        #[derive(Debug)]
        struct LateArrival(PathBuf);
        impl VolumeProbe for LateArrival {
            fn same_volume(&self, _source: &Path, _destination_dir: &Path) -> io::Result<bool> {
                fs::write(&self.0, "old")?;
                Ok(false)
            }
        }

        let destination = music.join("song.mp3");
        let mover = Mover::with_probe(Arc::new(LateArrival(destination.clone())));
        let outcome = mover.relocate(&MoveOperation::new(&source, &destination));

        assert!(matches!(
            outcome,
            MoveOutcome::Failed { error: MoveError::DestinationOccupied(_), .. }
        ));
        assert_eq!(fs::read_to_string(&destination).unwrap(), "old");
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
    }
}
