//! This module provides the server-side content index.
//!
//! The index maintains a live bidirectional identifier↔path mapping over a
//! watched directory tree, used to answer "do you have identifier X" lookups.
//! Filesystem notifications are funneled through a single event-processing
//! routine, the only writer of the mapping, so events for one path apply in
//! arrival order with no overlap and every mutation happens-before the update
//! message it broadcasts. Readers go through [`ContentIndex::lookup()`]
//! concurrently and always observe a fully-written entry, though they may see
//! the old or the new value while an identifier recomputation is in flight.

use std::collections::HashMap;
use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures::future;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::cid::ContentId;
use crate::error::{Error, Result};
use crate::task;

const POOL_SIZE: NonZeroU8 = unsafe { NonZeroU8::new_unchecked(8) };
const UPDATE_CAPACITY: usize = 64;

/// The kind of mapping mutation an update message reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Add,
    Change,
    Delete,
}

/// An update message broadcast to subscribers after a mapping mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUpdate {
    pub kind: UpdateKind,
    /// The identifier involved; `None` for a delete that had no mapping.
    pub cid: Option<ContentId>,
    pub path: PathBuf,
}

/// The index lifecycle.
///
/// `Initializing` covers the initial scan inside [`ContentIndex::start()`]; a
/// handle you can observe is already `Ready`, and turns `Stopped` once
/// [`ContentIndex::stop()`] has halted the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Initializing,
    Ready,
    Stopped,
}

/// The bidirectional identifier↔path mapping.
///
/// At any instant each path maps to at most one identifier and vice versa;
/// a change event removes the old association before inserting the new one.
#[derive(Debug, Default)]
struct BiMap {
    cid2path: HashMap<ContentId, PathBuf>,
    path2cid: HashMap<PathBuf, ContentId>,
}

impl BiMap {
    fn insert(&mut self, cid: ContentId, path: PathBuf) {
        if let Some(stale) = self.path2cid.insert(path.clone(), cid.clone()) {
            self.cid2path.remove(&stale);
        }

        self.cid2path.insert(cid, path);
    }

    fn remove_path(&mut self, path: &Path) -> Option<ContentId> {
        let cid = self.path2cid.remove(path)?;
        self.cid2path.remove(&cid);

        Some(cid)
    }
}

type SharedMaps = Arc<RwLock<BiMap>>;

/// A live directory-watching content index.
///
/// The in-memory mapping is protected for concurrent R/W access but written
/// exclusively by the index's own event routine; [`ContentIndex::lookup()`]
/// callers read it lock-step-free of any in-flight identifier recomputation.
pub struct ContentIndex {
    /// The watched root directory, an absolute path.
    root: PathBuf,
    state: IndexState,
    maps: SharedMaps,
    updates: broadcast::Sender<IndexUpdate>,
    watcher: Option<RecommendedWatcher>,
    /// A pool running the initial-scan computations and the event routine.
    pool: task::Pool,
}

impl ContentIndex {
    /// Start watching `root` and resolve once the index is ready.
    ///
    /// Fails with [`Error::InvalidPath`] when `root` is not absolute. The
    /// initial recursive scan discovers existing files and spawns one
    /// asynchronous identifier computation per file; the call returns only
    /// after all of them have been inserted, and no update message is emitted
    /// for the initial state.
    pub async fn start(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.is_absolute() {
            return Err(Error::InvalidPath(root));
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |outcome: notify::Result<notify::Event>| {
                let _ = sender.send(outcome);
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let maps = SharedMaps::default();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);

        let mut pool = task::Pool::default();
        pool.start(POOL_SIZE);

        tracing::debug!("Populate content index from `{}`", root.display());

        let mut initial = Vec::new();

        for path in walk_dir(&root)? {
            let maps = Arc::clone(&maps);

            let (remote_handle, _) = pool.execute(async move {
                if let Some(cid) = compute(&path).await {
                    maps.write().unwrap().insert(cid, path);
                }
            });

            initial.push(remote_handle);
        }

        let _ = future::join_all(initial).await;

        pool.forget(process_events(receiver, Arc::clone(&maps), updates.clone()));

        tracing::debug!("Content index ready over `{}`", root.display());

        Ok(Self {
            root,
            state: IndexState::Ready,
            maps,
            updates,
            watcher: Some(watcher),
            pool,
        })
    }

    /// The watched root directory.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current lifecycle state.
    #[inline]
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Look up the path currently serving `cid`, constant-time.
    ///
    /// A lookup issued between a filesystem event and the completion of its
    /// identifier computation simply does not see the entry yet; this
    /// staleness window is tolerated by design.
    pub fn lookup(&self, cid: &ContentId) -> Option<PathBuf> {
        self.maps.read().unwrap().cid2path.get(cid).cloned()
    }

    /// A full snapshot of the identifier→path mapping.
    pub fn snapshot(&self) -> HashMap<ContentId, PathBuf> {
        self.maps.read().unwrap().cid2path.clone()
    }

    /// Subscribe to update messages for subsequent mapping mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexUpdate> {
        self.updates.subscribe()
    }

    /// Halt the filesystem watch, idempotent.
    ///
    /// Dropping the watcher closes the event channel; the event routine drains
    /// whatever is already queued and exits with the pool, so no update
    /// message is emitted after this call returns.
    pub async fn stop(&mut self) {
        if self.state == IndexState::Stopped {
            return;
        }

        drop(self.watcher.take());
        self.pool.stop().await;
        self.state = IndexState::Stopped;

        tracing::debug!("Content index stopped over `{}`", self.root.display());
    }
}

/// The single-writer event routine.
///
/// Events are applied sequentially in arrival order, which trivially gives the
/// per-path ordering guarantee: an add is fully applied, identifier
/// computation included, before a subsequent event for the same path starts.
async fn process_events(
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    maps: SharedMaps,
    updates: broadcast::Sender<IndexUpdate>,
) {
    while let Some(outcome) = events.recv().await {
        let event = match outcome {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Filesystem watch error: {err}");
                continue;
            }
        };

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    apply_add(&maps, &updates, path).await;
                }
            }
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
                for path in event.paths {
                    apply_change(&maps, &updates, path).await;
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    apply_delete(&maps, &updates, path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = &event.paths[..] {
                    apply_delete(&maps, &updates, from.clone());
                    apply_add(&maps, &updates, to.clone()).await;
                }
            }
            _ => {}
        }
    }
}

async fn apply_add(maps: &SharedMaps, updates: &broadcast::Sender<IndexUpdate>, path: PathBuf) {
    if !is_file(&path).await {
        return;
    }

    let Some(cid) = compute(&path).await else { return };

    maps.write().unwrap().insert(cid.clone(), path.clone());

    emit(updates, UpdateKind::Add, Some(cid), path);
}

async fn apply_change(maps: &SharedMaps, updates: &broadcast::Sender<IndexUpdate>, path: PathBuf) {
    if !is_file(&path).await {
        return;
    }

    // remove the stale association before recomputing, so no lookup can
    // resolve the old identifier to the changed path in the meantime
    maps.write().unwrap().remove_path(&path);

    let Some(cid) = compute(&path).await else { return };

    maps.write().unwrap().insert(cid.clone(), path.clone());

    emit(updates, UpdateKind::Change, Some(cid), path);
}

fn apply_delete(maps: &SharedMaps, updates: &broadcast::Sender<IndexUpdate>, path: PathBuf) {
    let cid = maps.write().unwrap().remove_path(&path);

    // emitted even when no mapping existed
    emit(updates, UpdateKind::Delete, cid, path);
}

fn emit(updates: &broadcast::Sender<IndexUpdate>, kind: UpdateKind, cid: Option<ContentId>, path: PathBuf) {
    let _ = updates.send(IndexUpdate { kind, cid, path });
}

/// Compute the identifier of the file at `path`.
///
/// A read failure produces no mapping: the file may have vanished
/// mid-computation and a future event will correct the state.
async fn compute(path: &Path) -> Option<ContentId> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(ContentId::from_bytes(bytes)),
        Err(err) => {
            tracing::trace!("Skipping unreadable `{}`: {err}", path.display());
            None
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|meta| meta.is_file()).unwrap_or(false)
}

/// Walk the local tree and return all regular files under `root`.
fn walk_dir(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        for entry in dir.read_dir()? {
            let entry = entry?;
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn cid(content: &str) -> ContentId {
        ContentId::from_bytes(content)
    }

    async fn eventually<T>(mut probe: impl FnMut() -> Option<T>) -> T {
        for _ in 0..200 {
            if let Some(value) = probe() {
                return value;
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        panic!("condition not reached in time");
    }

    async fn recv(updates: &mut broadcast::Receiver<IndexUpdate>) -> IndexUpdate {
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("no update in time")
            .expect("update channel closed")
    }

    #[tokio::test]
    async fn test_relative_root_is_rejected() {
        assert!(matches!(ContentIndex::start("relative/root").await, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_initial_scan_resolves_to_full_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().canonicalize().unwrap();

        std::fs::write(root.join("a.bin"), "alpha").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("b.bin"), "beta").unwrap();

        let mut index = ContentIndex::start(root.clone()).await.unwrap();

        assert_eq!(index.state(), IndexState::Ready);
        assert_eq!(index.lookup(&cid("alpha")), Some(root.join("a.bin")));
        assert_eq!(index.lookup(&cid("beta")), Some(root.join("sub").join("b.bin")));
        assert_eq!(index.lookup(&cid("gamma")), None);
        assert_eq!(index.snapshot().len(), 2);

        index.stop().await;
    }

    #[tokio::test]
    async fn test_add_change_delete_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().canonicalize().unwrap();

        let mut index = ContentIndex::start(root.clone()).await.unwrap();
        let mut updates = index.subscribe();

        let path = root.join("c.bin");

        std::fs::write(&path, "one").unwrap();
        assert_eq!(eventually(|| index.lookup(&cid("one"))).await, path);

        std::fs::write(&path, "two").unwrap();
        assert_eq!(eventually(|| index.lookup(&cid("two"))).await, path);
        assert_eq!(index.lookup(&cid("one")), None);

        std::fs::remove_file(&path).unwrap();
        eventually(|| index.lookup(&cid("two")).is_none().then_some(())).await;

        // mutation always happens-before its message; all updates concern the
        // single path touched, starting with its add and ending on its delete
        let mut kinds = Vec::new();

        loop {
            let update = recv(&mut updates).await;
            assert_eq!(update.path, path);

            let done = update.kind == UpdateKind::Delete;
            if done {
                assert_eq!(update.cid, Some(cid("two")));
            }

            kinds.push(update.kind);
            if done {
                break;
            }
        }

        assert_eq!(kinds.first(), Some(&UpdateKind::Add));

        index.stop().await;
    }

    #[tokio::test]
    async fn test_delete_without_mapping_still_notifies() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().canonicalize().unwrap();

        let mut index = ContentIndex::start(root.clone()).await.unwrap();
        let mut updates = index.subscribe();

        let dir = root.join("ghost");
        std::fs::create_dir(&dir).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        loop {
            let update = recv(&mut updates).await;

            if update.kind == UpdateKind::Delete {
                assert_eq!(update.cid, None);
                assert_eq!(update.path, dir);
                break;
            }
        }

        index.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_silences_updates() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().canonicalize().unwrap();

        let mut index = ContentIndex::start(root.clone()).await.unwrap();
        let mut updates = index.subscribe();

        index.stop().await;
        index.stop().await;

        assert_eq!(index.state(), IndexState::Stopped);

        std::fs::write(root.join("late.bin"), "late").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(index.lookup(&cid("late")), None);
        assert!(matches!(updates.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }
}
