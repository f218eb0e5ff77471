//! Embedding cache keyed by content fingerprint and config version
//!
//! Concurrent requests for the same key compute once: the first caller holds
//! the key's slot while it computes and later callers wait on it and reuse the
//! result. Failed computations remove their slot so the next caller retries.
//! The map holds at most `max_entries` keys and evicts the oldest first. An
//! optional directory of `.tbe` records backs the in-memory map.

use crate::aggregate::Embedding;
use crate::error::Result;
use crate::harmony::HarmonySummary;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use timbre_store::{EmbeddingRecord, RecordReader, RecordWriter, RECORD_EXTENSION};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub config_version: String,
}

impl CacheKey {
    pub fn new(fingerprint: impl Into<String>, config_version: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            config_version: config_version.into(),
        }
    }
}

/// Cached result of one extraction
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub embedding: Embedding,
    /// Not persisted; absent for entries loaded from disk
    pub harmony: Option<HarmonySummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub computations: u64,
}

/// Keys kept in memory when no capacity is configured
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

type Slot = Arc<Mutex<Option<CachedEmbedding>>>;

/// Slots plus their insertion order
#[derive(Default)]
struct Slots {
    map: HashMap<CacheKey, Slot>,
    order: VecDeque<CacheKey>,
}

impl Slots {
    fn insert(&mut self, key: &CacheKey, max_entries: usize) -> Slot {
        let slot = Slot::default();
        self.map.insert(key.clone(), Arc::clone(&slot));
        self.order.push_back(key.clone());
        while self.map.len() > max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.map.remove(&oldest).is_some() {
                log::debug!("Evicted cached embedding {}", oldest.fingerprint);
            }
        }
        slot
    }

    fn remove(&mut self, key: &CacheKey) {
        self.map.remove(key);
        self.order.retain(|k| k != key);
    }
}

pub struct EmbeddingCache {
    enabled: bool,
    max_entries: usize,
    slots: RwLock<Slots>,
    disk: Option<DiskCache>,
    hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(enabled: bool, disk: Option<DiskCache>) -> Self {
        Self {
            enabled,
            max_entries: DEFAULT_MAX_ENTRIES,
            slots: RwLock::new(Slots::default()),
            disk,
            hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Cache that always computes
    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    /// Keep at most `max_entries` keys in memory (at least one)
    pub fn with_capacity(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Return the cached entry for `key` or compute it.
    ///
    /// The flag is `true` when the entry came from memory or disk.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<(CachedEmbedding, bool)>
    where
        F: FnOnce() -> Result<CachedEmbedding>,
    {
        if !self.enabled {
            self.computations.fetch_add(1, Ordering::Relaxed);
            return compute().map(|entry| (entry, false));
        }

        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache hit for {}", key.fingerprint);
            return Ok((entry.clone(), true));
        }

        if let Some(embedding) = self.disk.as_ref().and_then(|disk| disk.load(key)) {
            self.disk_hits.fetch_add(1, Ordering::Relaxed);
            let entry = CachedEmbedding {
                embedding,
                harmony: None,
            };
            *guard = Some(entry.clone());
            return Ok((entry, true));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.computations.fetch_add(1, Ordering::Relaxed);
        let entry = match compute() {
            Ok(entry) => entry,
            Err(e) => {
                drop(guard);
                self.discard(key, &slot);
                return Err(e);
            }
        };

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.store(key, &entry.embedding) {
                log::warn!("Failed to persist embedding {}: {}", key.fingerprint, e);
            }
        }
        *guard = Some(entry.clone());
        Ok((entry, false))
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        {
            let slots = self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(slot) = slots.map.get(key) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slots.map.get(key) {
            Some(slot) => Arc::clone(slot),
            None => slots.insert(key, self.max_entries),
        }
    }

    /// Drop the empty slot of a failed computation unless another caller took it over
    fn discard(&self, key: &CacheKey, slot: &Slot) {
        let mut slots = self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let unused = match slots.map.get(key) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                matches!(slot.try_lock().as_deref(), Ok(None))
            }
            _ => false,
        };
        if unused {
            slots.remove(key);
        }
    }

    /// Number of keys holding an entry in memory
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .map
            .values()
            .filter(|slot| slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a slot, including computations in flight
    pub fn slot_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map
            .len()
    }

    pub fn clear(&self) {
        *self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Slots::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.disk.as_ref().map_or(0, DiskCache::stale_count),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }
}

/// Directory of embedding records named by fingerprint
pub struct DiskCache {
    directory: PathBuf,
    writer: RecordWriter,
    stale: AtomicU64,
}

impl DiskCache {
    pub fn open(directory: &Path, compress: bool) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            writer: if compress {
                RecordWriter::compressed(3)
            } else {
                RecordWriter::new()
            },
            stale: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", fingerprint, RECORD_EXTENSION))
    }

    /// Stored embedding for `key`; records from another config version are
    /// stale and count as misses
    pub fn load(&self, key: &CacheKey) -> Option<Embedding> {
        let path = self.path_for(&key.fingerprint);
        if !path.exists() {
            return None;
        }
        match RecordReader::read(&path) {
            Ok(record) if record.matches_version(&key.config_version) => {
                log::debug!("Loaded cached embedding from {}", path.display());
                Some(Embedding::new(record.values, record.metadata.config_version))
            }
            Ok(record) => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Ignoring stale record {} (config {} != {})",
                    path.display(),
                    record.metadata.config_version,
                    key.config_version
                );
                None
            }
            Err(e) => {
                log::warn!("Ignoring unreadable record {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, key: &CacheKey, embedding: &Embedding) -> Result<()> {
        let record = EmbeddingRecord::new(
            key.fingerprint.clone(),
            key.fingerprint.clone(),
            embedding.config_version(),
            embedding.values().to_vec(),
        );
        self.writer.write(&self.path_for(&key.fingerprint), &record)?;
        Ok(())
    }

    pub fn stale_count(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }
}
