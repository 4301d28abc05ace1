//! Live directory watching using the notify crate

use crate::config::{OrganizerConfig, SettleStrategy};
use crate::organizer::resolver::plan_move;
use crate::organizer::{MoveOutcome, Mover, is_hidden, report};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace};

/// Kinds of filesystem changes the organizer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Modified,
}

/// A change notification for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub change_type: ChangeType,
    pub timestamp: SystemTime,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, change_type: ChangeType) -> Self {
        Self { path: path.into(), change_type, timestamp: SystemTime::now() }
    }
}

/// A live stream of changes for one directory. Dropping it ends the
/// underlying OS subscription.
pub struct Subscription {
    directory: PathBuf,
    events: mpsc::UnboundedReceiver<FileChange>,
    _watcher: Option<RecommendedWatcher>,
}

impl Subscription {
    /// Wrap a plain channel, for sources that are not backed by notify
    pub fn from_channel(directory: &Path, events: mpsc::UnboundedReceiver<FileChange>) -> Self {
        Self { directory: directory.to_path_buf(), events, _watcher: None }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Produces change notifications for a single directory, non-recursively
pub trait EventSource: Send + Sync {
    fn subscribe(&mut self, directory: &Path) -> notify::Result<Subscription>;
}

/// The platform's recommended notify backend
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifySource;

impl EventSource for NotifySource {
    fn subscribe(&mut self, directory: &Path) -> notify::Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in changes_from_event(event) {
                    if tx.send(change).is_err() {
                        trace!("Watcher stopped; dropping event");
                        return;
                    }
                }
            }
            Err(e) => error!("Watch error: {:?}", e),
        })?;

        watcher.watch(directory, RecursiveMode::NonRecursive)?;
        info!("Monitoring directory: {}", directory.display());

        Ok(Subscription { directory: directory.to_path_buf(), events: rx, _watcher: Some(watcher) })
    }
}

/// Translate a notify event into the changes we act on
fn changes_from_event(event: Event) -> Vec<FileChange> {
    let change_type = match event.kind {
        EventKind::Create(_) => ChangeType::Created,
        // The old name of a rename no longer exists
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
        EventKind::Modify(_) => ChangeType::Modified,
        _ => return Vec::new(),
    };

    let skip = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => 1,
        _ => 0,
    };

    event.paths.into_iter().skip(skip).map(|path| FileChange::new(path, change_type)).collect()
}

/// Counters for one watcher's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    pub received: usize,
    /// Directories, hidden files and files already in a destination
    pub filtered: usize,
    pub unmanaged: usize,
    pub moved: usize,
    /// Duplicate triggers for a file already being handled or already gone
    pub benign: usize,
    pub failed: usize,
    /// Still settling when the stop request arrived
    pub abandoned: usize,
}

enum Disposition {
    Abandoned,
    Unmanaged,
    Completed(MoveOutcome),
    Crashed,
}

impl WatcherStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Abandoned => self.abandoned += 1,
            Disposition::Unmanaged => self.unmanaged += 1,
            Disposition::Completed(outcome) if outcome.is_moved() => self.moved += 1,
            Disposition::Completed(outcome) if outcome.is_benign_failure() => self.benign += 1,
            Disposition::Completed(_) | Disposition::Crashed => self.failed += 1,
        }
    }
}

/// Paths with a change currently being handled by this watcher
#[derive(Debug, Default, Clone)]
struct InProgress(Arc<Mutex<HashSet<PathBuf>>>);

impl InProgress {
    /// `None` while another task holds `path`
    fn claim(&self, path: &Path) -> Option<Claim> {
        let mut paths = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.insert(path.to_path_buf()) {
            return None;
        }
        Some(Claim { paths: self.clone(), path: path.to_path_buf() })
    }
}

/// Exclusive hold on one path, released on drop
#[derive(Debug)]
struct Claim {
    paths: InProgress,
    path: PathBuf,
}

impl Claim {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.paths.0.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.path);
    }
}

/// Organizes files in one directory as change notifications arrive.
///
/// Every accepted change is handled in its own task: filter, settle, classify,
/// resolve, move. Create and modify are treated alike, so one write can
/// trigger two notifications. A notification for a path that is still being
/// handled is dropped as benign; a later one finds the source gone, which is
/// benign as well.
pub struct LiveWatcher {
    config: Arc<OrganizerConfig>,
    mover: Mover,
    stop: watch::Receiver<bool>,
}

impl LiveWatcher {
    pub fn new(config: Arc<OrganizerConfig>, mover: Mover, stop: watch::Receiver<bool>) -> Self {
        Self { config, mover, stop }
    }

    /// Process changes until a stop is requested or the source closes, then
    /// wait for moves already underway.
    pub async fn run(self, mut subscription: Subscription) -> WatcherStats {
        let directory = subscription.directory().to_path_buf();
        let mut stats = WatcherStats::default();
        let mut in_flight: JoinSet<Disposition> = JoinSet::new();
        let in_progress = InProgress::default();
        let mut stop = self.stop.clone();

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut stop) => break,

                change = subscription.events.recv() => {
                    let Some(change) = change else {
                        debug!("Event source for {} closed", directory.display());
                        break;
                    };
                    stats.received += 1;

                    if !self.accepts(&change.path) {
                        stats.filtered += 1;
                        continue;
                    }

                    let Some(claim) = in_progress.claim(&change.path) else {
                        debug!("Already handling {}", change.path.display());
                        stats.benign += 1;
                        continue;
                    };

                    trace!("{:?} {}", change.change_type, change.path.display());
                    in_flight.spawn(handle_change(
                        claim,
                        Arc::clone(&self.config),
                        self.mover.clone(),
                        self.stop.clone(),
                    ));
                }

                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    stats.record(done.unwrap_or(Disposition::Crashed));
                }
            }
        }

        // No new notifications past this point
        drop(subscription);

        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight events in {}", in_flight.len(), directory.display());
        }
        while let Some(done) = in_flight.join_next().await {
            stats.record(done.unwrap_or(Disposition::Crashed));
        }

        info!("Stopped watching {}", directory.display());
        stats
    }

    fn accepts(&self, path: &Path) -> bool {
        if path.is_dir() {
            trace!("Ignoring directory: {}", path.display());
            return false;
        }
        if is_hidden(path) {
            debug!("Ignoring hidden file: {}", path.display());
            return false;
        }
        if self.config.is_within_destination(path) {
            debug!("Ignoring already organized file: {}", path.display());
            return false;
        }
        true
    }
}

async fn handle_change(
    claim: Claim,
    config: Arc<OrganizerConfig>,
    mover: Mover,
    mut stop: watch::Receiver<bool>,
) -> Disposition {
    tokio::select! {
        biased;
        _ = stop_requested(&mut stop) => {
            debug!("Abandoning {} before it settled", claim.path().display());
            return Disposition::Abandoned;
        }
        _ = settle(claim.path(), config.settle()) => {}
    }

    if config.classifier().classify(claim.path()).is_none() {
        debug!("Skipping non-managed file: {}", claim.path().display());
        return Disposition::Unmanaged;
    }

    // Once started, a move always runs to completion; the claim is held until it has
    let result = tokio::task::spawn_blocking(move || {
        plan_move(config.classifier(), claim.path(), |_| false)
            .map(|operation| mover.relocate(&operation))
    })
    .await;

    match result {
        Ok(Some(outcome)) => {
            report(&outcome);
            Disposition::Completed(outcome)
        }
        Ok(None) => Disposition::Unmanaged,
        Err(e) => {
            error!("Move task failed: {}", e);
            Disposition::Crashed
        }
    }
}

/// Resolves once the stop flag is set or its sender is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    stop.wait_for(|stopped| *stopped).await.ok();
}

/// Wait until the file at `path` is probably no longer being written
pub async fn settle(path: &Path, strategy: SettleStrategy) {
    match strategy {
        SettleStrategy::Fixed { delay_ms } => sleep(Duration::from_millis(delay_ms)).await,
        SettleStrategy::StableSize { interval_ms, checks, timeout_ms } => {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            let interval = Duration::from_millis(interval_ms);
            let mut last_size = None;
            let mut stable = 0;

            while stable < checks {
                if Instant::now() >= deadline {
                    debug!(
                        "{} still changing after {}ms; moving anyway",
                        path.display(),
                        timeout_ms
                    );
                    return;
                }
                sleep(interval).await;

                // A vanished file is the mover's problem to report
                let Ok(metadata) = tokio::fs::metadata(path).await else { return };
                let size = metadata.len();
                if last_size == Some(size) {
                    stable += 1;
                } else {
                    last_size = Some(size);
                    stable = 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrganizerSettings;
    use crate::organizer::VolumeProbe;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn setup(settle_ms: u64) -> (TempDir, Arc<OrganizerConfig>) {
        let dir = TempDir::new().unwrap();
        let settings = OrganizerSettings {
            root: Some(dir.path().to_path_buf()),
            watch: vec![PathBuf::from("inbox")],
            settle: SettleStrategy::Fixed { delay_ms: settle_ms },
            ..OrganizerSettings::default()
        };
        let config = settings.resolve().unwrap();
        fs::create_dir(dir.path().join("inbox")).unwrap();
        for category in config.categories() {
            fs::create_dir_all(&category.directory).unwrap();
        }
        (dir, Arc::new(config))
    }

    #[test]
    fn test_event_translation() {
        let created =
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/w/a.mp3"));
        assert_eq!(changes_from_event(created)[0].change_type, ChangeType::Created);

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/w/a.mp3"));
        assert_eq!(changes_from_event(written)[0].change_type, ChangeType::Modified);

        let chmod = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))
            .add_path(PathBuf::from("/w/a.mp3"));
        assert_eq!(changes_from_event(chmod).len(), 1);

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/a.mp3.part"))
            .add_path(PathBuf::from("/w/a.mp3"));
        let changes = changes_from_event(renamed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, PathBuf::from("/w/a.mp3"));

        let renamed_away = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/w/a.mp3"));
        assert!(changes_from_event(renamed_away).is_empty());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/w/a.mp3"));
        assert!(changes_from_event(removed).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_events_move_once() {
        let (dir, config) = setup(10);
        let inbox = dir.path().join("inbox");
        let file = inbox.join("photo.png");
        fs::write(&file, "pixels").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let watcher = LiveWatcher::new(config, Mover::new(), stop_rx);

        tx.send(FileChange::new(&file, ChangeType::Created)).unwrap();
        tx.send(FileChange::new(&file, ChangeType::Modified)).unwrap();
        drop(tx);

        let stats = watcher.run(Subscription::from_channel(&inbox, rx)).await;

        assert_eq!(stats.received, 2);
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.benign, 1);
        assert_eq!(stats.failed, 0);
        assert!(!file.exists());
        assert_eq!(fs::read_dir(dir.path().join("Pictures")).unwrap().count(), 1);
        let moved = dir.path().join("Pictures").join("photo.png");
        assert_eq!(fs::read_to_string(moved).unwrap(), "pixels");
    }

    /// Every destination is on another volume; counts the moves that reach the mover
    #[derive(Debug, Default)]
    struct ForeignVolumeCounter {
        calls: AtomicUsize,
    }

    impl VolumeProbe for ForeignVolumeCounter {
        fn same_volume(&self, _source: &Path, _destination_dir: &Path) -> io::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_events_across_volumes_copy_once() {
        let (dir, config) = setup(10);
        let inbox = dir.path().join("inbox");
        let file = inbox.join("photo.png");
        fs::write(&file, "pixels").unwrap();

        let probe = Arc::new(ForeignVolumeCounter::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let watcher = LiveWatcher::new(config, Mover::with_probe(probe.clone()), stop_rx);

        tx.send(FileChange::new(&file, ChangeType::Created)).unwrap();
        tx.send(FileChange::new(&file, ChangeType::Modified)).unwrap();
        drop(tx);

        let stats = watcher.run(Subscription::from_channel(&inbox, rx)).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.benign, 1);
        assert!(!file.exists());
        let moved = dir.path().join("Pictures").join("photo.png");
        assert_eq!(fs::read_to_string(moved).unwrap(), "pixels");
    }

    #[tokio::test]
    async fn test_path_is_released_after_handling() {
        let (dir, config) = setup(0);
        let inbox = dir.path().join("inbox");
        let first = inbox.join("a.mp3");
        fs::write(&first, "one").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = LiveWatcher::new(config, Mover::new(), stop_rx);
        let handle = tokio::spawn(watcher.run(Subscription::from_channel(&inbox, rx)));

        tx.send(FileChange::new(&first, ChangeType::Created)).unwrap();
        let music = dir.path().join("Music");
        for _ in 0..500 {
            if music.join("a.mp3").exists() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(50)).await;

        // A new file under the same name is handled again
        fs::write(&first, "two").unwrap();
        tx.send(FileChange::new(&first, ChangeType::Created)).unwrap();
        for _ in 0..500 {
            if music.join("a_1.mp3").exists() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        stop_tx.send_replace(true);

        let stats = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(stats.moved, 2);
        assert_eq!(fs::read_to_string(music.join("a_1.mp3")).unwrap(), "two");
    }

    #[tokio::test]
    async fn test_filters_hidden_directories_and_destinations() {
        let (dir, config) = setup(10);
        let inbox = dir.path().join("inbox");
        let hidden = inbox.join(".cache.mp3");
        let folder = inbox.join("album.mp3");
        let organized = dir.path().join("Music").join("song.mp3");
        let unmanaged = inbox.join("notes.xyz");
        fs::write(&hidden, "x").unwrap();
        fs::create_dir(&folder).unwrap();
        fs::write(&organized, "x").unwrap();
        fs::write(&unmanaged, "x").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        for path in [&hidden, &folder, &organized, &unmanaged] {
            tx.send(FileChange::new(path, ChangeType::Created)).unwrap();
        }
        drop(tx);

        let stats = LiveWatcher::new(config, Mover::new(), stop_rx)
            .run(Subscription::from_channel(&inbox, rx))
            .await;

        assert_eq!(stats.filtered, 3);
        assert_eq!(stats.unmanaged, 1);
        assert_eq!(stats.moved, 0);
        assert!(hidden.exists() && folder.is_dir() && organized.exists() && unmanaged.exists());
    }

    #[tokio::test]
    async fn test_stop_abandons_settling_events() {
        let (dir, config) = setup(60_000);
        let inbox = dir.path().join("inbox");
        let file = inbox.join("song.mp3");
        fs::write(&file, "x").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = LiveWatcher::new(config, Mover::new(), stop_rx);
        let handle = tokio::spawn(watcher.run(Subscription::from_channel(&inbox, rx)));

        tx.send(FileChange::new(&file, ChangeType::Created)).unwrap();
        sleep(Duration::from_millis(100)).await;
        stop_tx.send_replace(true);

        let stats = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.abandoned, 1);
        assert!(file.exists());

        // The subscription is gone, so later events have nowhere to go
        assert!(tx.send(FileChange::new(&file, ChangeType::Modified)).is_err());
    }

    #[tokio::test]
    async fn test_stable_size_settle_returns_for_static_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("done.bin");
        fs::write(&file, vec![0u8; 128]).unwrap();

        let strategy = SettleStrategy::StableSize { interval_ms: 5, checks: 3, timeout_ms: 5_000 };
        tokio::time::timeout(Duration::from_secs(2), settle(&file, strategy)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stable_size_settle_gives_up_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let strategy = SettleStrategy::StableSize { interval_ms: 5, checks: 3, timeout_ms: 5_000 };

        tokio::time::timeout(Duration::from_secs(1), settle(&dir.path().join("gone"), strategy))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_source_reports_new_files() {
        let dir = TempDir::new().unwrap();
        let mut subscription = NotifySource.subscribe(dir.path()).unwrap();

        let file = dir.path().join("fresh.txt");
        fs::write(&file, "hello").unwrap();

        // Backends differ in what they report; any change for the file will do
        let change = tokio::time::timeout(Duration::from_secs(5), subscription.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.path.file_name(), file.file_name());
    }
}
