//! Durable registry of tracked notifications.
//!
//! Maps an [`EntityKey`] to the handles of the messages delivered for it.
//! A key is present exactly while its notification is believed to exist in
//! the destination channel; the reconciler repairs drift between the two.
//!
//! # Durability
//!
//! Every mutation writes the complete registry to disk (atomically, see
//! [`store`]) *before* updating memory and returning. If the write fails the
//! error is returned and the in-memory state is left untouched, so memory
//! never runs ahead of disk. The write itself runs on tokio's blocking pool.
//!
//! # Concurrency
//!
//! Mutations are serialized by an async writer lock, so concurrent puts to
//! different keys cannot clobber each other. Reads never wait on a write in
//! progress; they see the last committed state. Read-decide-write cycles on
//! one key (deliver then track, query then evict) must additionally hold that
//! key's [`KeyGuard`] from [`NotificationRegistry::lock_key`].

pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::types::{EntityKey, MessageHandle};

pub use store::{RegistryError, RegistryFile, TrackedNotification};

/// Holding this serializes read-decide-write cycles on one key.
pub type KeyGuard = OwnedMutexGuard<()>;

type Entries = BTreeMap<EntityKey, TrackedNotification>;

#[derive(Debug)]
pub struct NotificationRegistry {
    path: PathBuf,
    entries: Mutex<Entries>,
    writer: tokio::sync::Mutex<()>,
    key_locks: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl NotificationRegistry {
    /// Opens the registry at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries = match store::try_load(&path)? {
            Some(file) => {
                info!(path = %path.display(), entries = file.entries.len(), "Loaded notification registry");
                file.entries
            }
            None => {
                info!(path = %path.display(), "No notification registry yet, starting empty");
                BTreeMap::new()
            }
        };
        Ok(NotificationRegistry {
            path,
            entries: Mutex::new(entries),
            writer: tokio::sync::Mutex::new(()),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `handles` for `key`, replacing any previous record.
    pub async fn put(&self, key: EntityKey, handles: Vec<MessageHandle>) -> Result<(), RegistryError> {
        debug!(key = %key, handles = handles.len(), "Tracking notification");
        self.mutate(|entries| {
            entries.insert(key, TrackedNotification::new(handles));
            (true, ())
        })
        .await
    }

    /// Replaces the handles of an existing record, keeping its `created_at`.
    /// Removes the key when `handles` is empty. No-op for unknown keys.
    pub async fn set_handles(
        &self,
        key: &EntityKey,
        handles: Vec<MessageHandle>,
    ) -> Result<(), RegistryError> {
        self.mutate(|entries| {
            if handles.is_empty() {
                (entries.remove(key).is_some(), ())
            } else if let Some(entry) = entries.get_mut(key) {
                entry.handles = handles;
                (true, ())
            } else {
                (false, ())
            }
        })
        .await
    }

    pub fn get(&self, key: &EntityKey) -> Option<TrackedNotification> {
        self.lock_entries().get(key).cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.lock_entries().contains_key(key)
    }

    /// Removes `key`, returning its record. Unknown keys are not an error and
    /// do not touch the disk.
    pub async fn remove(&self, key: &EntityKey) -> Result<Option<TrackedNotification>, RegistryError> {
        let removed = self
            .mutate(|entries| {
                let removed = entries.remove(key);
                (removed.is_some(), removed)
            })
            .await?;
        if removed.is_some() {
            debug!(key = %key, "Untracked notification");
        }
        Ok(removed)
    }

    /// A point-in-time copy of every entry, in key order.
    pub fn all(&self) -> RegistrySnapshot {
        let entries: Vec<_> = self
            .lock_entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        RegistrySnapshot {
            entries: Arc::new(entries),
        }
    }

    /// Drops every handle for which `keep` returns false, removing entries
    /// left without handles. Returns the keys that were removed entirely.
    pub async fn retain_handles(
        &self,
        mut keep: impl FnMut(&MessageHandle) -> bool,
    ) -> Result<Vec<EntityKey>, RegistryError> {
        self.mutate(|entries| {
            let mut changed = false;
            let mut emptied = Vec::new();
            for (key, entry) in entries.iter_mut() {
                let before = entry.handles.len();
                entry.handles.retain(&mut keep);
                if entry.handles.len() != before {
                    changed = true;
                    if entry.handles.is_empty() {
                        emptied.push(key.clone());
                    }
                }
            }
            for key in &emptied {
                entries.remove(key);
            }
            (changed, emptied)
        })
        .await
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Acquires the per-key lock, waiting if another task holds it.
    pub async fn lock_key(&self, key: &EntityKey) -> KeyGuard {
        let lock = {
            let mut locks = self
                .key_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Locks nobody holds or waits on are dropped.
            locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Applies `apply` to a copy of the entries. When it reports a change the
    /// copy is written to disk and only then becomes the committed state.
    async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Entries) -> (bool, R),
    ) -> Result<R, RegistryError> {
        let _writer = self.writer.lock().await;
        let mut next = self.lock_entries().clone();
        let (changed, result) = apply(&mut next);
        if !changed {
            return Ok(result);
        }

        let path = self.path.clone();
        let file = RegistryFile::new(next);
        let file = tokio::task::spawn_blocking(move || store::save_atomic(&path, &file).map(|()| file))
            .await??;
        *self.lock_entries() = file.entries;
        Ok(result)
    }

    fn lock_entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A restartable view of the registry taken by [`NotificationRegistry::all`].
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    entries: Arc<Vec<(EntityKey, TrackedNotification)>>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &(EntityKey, TrackedNotification)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_entity_key, arb_handle};
    use crate::types::{ChannelId, MessageId};
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn open() -> (TempDir, NotificationRegistry) {
        let dir = tempdir().unwrap();
        let registry = NotificationRegistry::open(dir.path().join("notification_registry.json")).unwrap();
        (dir, registry)
    }

    fn handle(c: u64, m: u64) -> MessageHandle {
        MessageHandle::new(ChannelId(c), MessageId(m))
    }

    fn key(n: u64) -> EntityKey {
        EntityKey::new("o/r", n)
    }

    #[tokio::test]
    async fn put_get_remove() {
        let (_dir, registry) = open();
        let handles = vec![handle(1, 10), handle(1, 11)];

        registry.put(key(1), handles.clone()).await.unwrap();
        assert_eq!(registry.get(&key(1)).unwrap().handles, handles);

        let removed = registry.remove(&key(1)).await.unwrap();
        assert_eq!(removed.map(|r| r.handles), Some(handles));
        assert_eq!(registry.get(&key(1)), None);
        assert_eq!(registry.remove(&key(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notification_registry.json");
        {
            let registry = NotificationRegistry::open(&path).unwrap();
            registry.put(key(1), vec![handle(1, 10)]).await.unwrap();
            registry.put(key(2), vec![handle(2, 20)]).await.unwrap();
            registry.remove(&key(2)).await.unwrap();
        }

        let reopened = NotificationRegistry::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&key(1)).unwrap().handles, vec![handle(1, 10)]);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes every rename fail.
        let path = dir.path().join("notification_registry.json");
        let registry = NotificationRegistry::open(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        assert!(registry.put(key(1), vec![handle(1, 10)]).await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unchanged_mutations_skip_the_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notification_registry.json");
        let registry = NotificationRegistry::open(&path).unwrap();

        assert_eq!(registry.remove(&key(1)).await.unwrap(), None);
        registry.set_handles(&key(1), vec![handle(1, 1)]).await.unwrap();
        assert!(registry.retain_handles(|_| false).await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn snapshot_is_restartable_and_isolated() {
        let (_dir, registry) = open();
        registry.put(key(1), vec![handle(1, 10)]).await.unwrap();
        registry.put(key(2), vec![handle(1, 11)]).await.unwrap();

        let snapshot = registry.all();
        registry.remove(&key(1)).await.unwrap();

        assert_eq!(snapshot.keys().count(), 2);
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![key(1), key(2)]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn retain_handles_evicts_emptied_entries() {
        let (_dir, registry) = open();
        registry.put(key(1), vec![handle(1, 10), handle(2, 20)]).await.unwrap();
        registry.put(key(2), vec![handle(1, 11)]).await.unwrap();
        registry.put(key(3), vec![handle(3, 30)]).await.unwrap();

        let emptied = registry
            .retain_handles(|h| h.channel_id != ChannelId(1))
            .await
            .unwrap();

        assert_eq!(emptied, vec![key(2)]);
        assert_eq!(registry.get(&key(1)).unwrap().handles, vec![handle(2, 20)]);
        assert!(registry.contains(&key(3)));
    }

    #[tokio::test]
    async fn set_handles_keeps_created_at() {
        let (_dir, registry) = open();
        registry.put(key(1), vec![handle(1, 10), handle(1, 11)]).await.unwrap();
        let created_at = registry.get(&key(1)).unwrap().created_at;

        registry.set_handles(&key(1), vec![handle(1, 11)]).await.unwrap();
        let entry = registry.get(&key(1)).unwrap();
        assert_eq!(entry.handles, vec![handle(1, 11)]);
        assert_eq!(entry.created_at, created_at);

        registry.set_handles(&key(1), Vec::new()).await.unwrap();
        assert!(!registry.contains(&key(1)));

        registry.set_handles(&key(9), vec![handle(1, 1)]).await.unwrap();
        assert!(!registry.contains(&key(9)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn entries_survive_reopen(
            entries in proptest::collection::btree_map(
                arb_entity_key(),
                proptest::collection::vec(arb_handle(), 1..4),
                0..8,
            )
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("notification_registry.json");
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let registry = NotificationRegistry::open(&path).unwrap();
                for (key, handles) in &entries {
                    registry.put(key.clone(), handles.clone()).await.unwrap();
                }
            });

            let reopened = NotificationRegistry::open(&path).unwrap();
            prop_assert_eq!(reopened.len(), entries.len());
            for (key, handles) in &entries {
                prop_assert_eq!(&reopened.get(key).unwrap().handles, handles);
            }
        }
    }

    #[tokio::test]
    async fn concurrent_puts_to_different_keys() {
        let (_dir, registry) = open();
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.put(key(n), vec![handle(1, n)]).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = NotificationRegistry::open(registry.path()).unwrap();
        assert_eq!(reopened.len(), 16);
    }

    #[tokio::test]
    async fn key_lock_serializes_same_key() {
        let (_dir, registry) = open();
        let registry = Arc::new(registry);

        let guard = registry.lock_key(&key(1)).await;

        let r = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            let _guard = r.lock_key(&key(1)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different key is not blocked.
        let _other = tokio::time::timeout(Duration::from_secs(1), registry.lock_key(&key(2)))
            .await
            .unwrap();

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
