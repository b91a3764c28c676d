//! Storage Engine
//!
//! Sharded in-memory map. Keys are spread over a fixed set of shards by an
//! FNV-1a hash of the key bytes, each shard behind its own reader/writer
//! lock. Every mutation is committed to the WAL before it becomes visible
//! in memory; reads never touch the WAL.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::wal::{Entry, Operation, Wal};

/// Number of shards; FNV-1a keeps the mapping deterministic across runs
pub const SHARD_COUNT: usize = 16;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32-bit hash over the key bytes
fn fnv1a(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

type Shard = RwLock<HashMap<Vec<u8>, Vec<u8>>>;

/// Sharded in-memory storage engine
pub struct Engine {
    shards: Vec<Shard>,
    wal: Option<Wal>,
}

impl Engine {
    /// Create an empty engine. Without a WAL, writes apply directly and
    /// durability is not offered.
    pub fn new(wal: Option<Wal>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::default()).collect(),
            wal,
        }
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[fnv1a(key) as usize % SHARD_COUNT]
    }

    /// Store a key-value pair, WAL-first
    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.submit(Entry::set(key.to_vec(), value.to_vec())).await?;
        }
        self.shard(key)
            .write()
            .await
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Look up a key
    pub async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.shard(key).read().await.get(key).cloned()
    }

    /// Remove a key, WAL-first
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.submit(Entry::delete(key.to_vec())).await?;
        }
        self.shard(key).write().await.remove(key);
        Ok(())
    }

    /// Drop every key, WAL-first. Shards are emptied in index order.
    pub async fn clear(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.submit(Entry::clear()).await?;
        }
        self.clear_shards().await;
        Ok(())
    }

    async fn clear_shards(&self) {
        for shard in &self.shards {
            *shard.write().await = HashMap::new();
        }
    }

    /// Apply recovered entries in write order. Runs at startup, before any
    /// client is served, and does not go through the WAL.
    pub async fn replay(&self, entries: &[Entry]) {
        for entry in entries {
            match entry.operation {
                Operation::Set => {
                    self.shard(&entry.key)
                        .write()
                        .await
                        .insert(entry.key.clone(), entry.value.clone());
                }
                Operation::Delete => {
                    self.shard(&entry.key).write().await.remove(&entry.key);
                }
                Operation::Clear => self.clear_shards().await,
            }
        }
    }

    /// Total number of keys across all shards
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }

    /// True when no shard holds any key
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
