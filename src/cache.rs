// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generational, hash-indexed sprite cache.
//!
//! The cache maps a [`SpriteKey`] to an atlas slot. It owns a fixed pool of
//! entries; pool entry `i` always owns atlas slot `i`, so a slot index is
//! stable for as long as its entry stays resident. Entries are chained into
//! power-of-two hash buckets or into a free list through index links.
//!
//! Staleness is tracked with a frame generation: [`SpriteCache::get`] stamps
//! the current generation on a hit and [`SpriteCache::evict_stale`] reclaims
//! every entry whose stamp is older. A second axis,
//! [`SpriteCache::invalidate_by`], purges entries by key content regardless
//! of recency.
//!
//! Every insert opens a new residency epoch for its slot. A [`SlotHandle`]
//! pairs the slot with that epoch so holders can detect reuse.

use thiserror::Error;

use crate::key::SpriteKey;

/// Cache failures. A miss is not an error and is reported as `None`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    #[error("sprite pool exhausted")]
    Full,
    #[error("eviction sweep freed no entries")]
    NothingStale,
    #[error("bucket count {0} is not a non-zero power of two")]
    InvalidBucketCount(usize),
    #[error("pool capacity {0} is out of range")]
    InvalidCapacity(usize),
}

/// A slot together with the residency epoch it was handed out in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub slot: usize,
    pub epoch: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SpriteEntry {
    key: SpriteKey,
    last_used: u32,
    epoch: u32,
    live: bool,
    next: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpriteCache {
    buckets: Vec<Option<u32>>,
    entries: Vec<SpriteEntry>,
    free_head: Option<u32>,
    mask: u32,
    generation: u32,
    occupancy: usize,
}

impl SpriteCache {
    /// Create a cache with `bucket_count` buckets (power of two) and
    /// `capacity` pool entries.
    pub fn new(bucket_count: usize, capacity: usize) -> Result<Self, CacheError> {
        if bucket_count == 0 || !bucket_count.is_power_of_two() || bucket_count > 1 << 31 {
            return Err(CacheError::InvalidBucketCount(bucket_count));
        }
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(CacheError::InvalidCapacity(capacity));
        }

        let mut cache = Self {
            buckets: vec![None; bucket_count],
            entries: vec![SpriteEntry::default(); capacity],
            free_head: None,
            mask: (bucket_count - 1) as u32,
            generation: 0,
            occupancy: 0,
        };
        cache.reset();
        Ok(cache)
    }

    /// Drop every entry and rebuild the free list in slot order.
    ///
    /// Residency epochs survive the reset so handles issued before it stay
    /// invalid afterwards.
    pub fn reset(&mut self) {
        self.buckets.fill(None);
        let last = self.entries.len() - 1;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.live = false;
            entry.next = if i < last { Some(i as u32 + 1) } else { None };
        }
        self.free_head = Some(0);
        self.occupancy = 0;
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    pub fn advance_generation(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// True once occupancy reaches `capacity - 1`, the point where callers
    /// run a lazy sweep before the next insert.
    pub fn needs_sweep(&self) -> bool {
        self.occupancy + 1 >= self.entries.len()
    }

    /// Look up `key`, stamping the current generation on a hit.
    pub fn get(&mut self, key: SpriteKey) -> Option<usize> {
        let slot = self.find(key)?;
        self.entries[slot].last_used = self.generation;
        Some(slot)
    }

    /// Look up `key` without touching its generation.
    pub fn peek(&self, key: SpriteKey) -> Option<usize> {
        self.find(key)
    }

    fn find(&self, key: SpriteKey) -> Option<usize> {
        let mut cursor = self.buckets[key.bucket(self.mask)];
        while let Some(i) = cursor {
            let entry = &self.entries[i as usize];
            if entry.key == key {
                return Some(i as usize);
            }
            cursor = entry.next;
        }
        None
    }

    /// Take a free slot for `key` and append it to its bucket.
    ///
    /// Never displaces a live entry: an empty free list yields
    /// [`CacheError::Full`] and the caller decides whether to sweep. The
    /// caller is expected to have missed on `key` first.
    pub fn insert(&mut self, key: SpriteKey) -> Result<usize, CacheError> {
        let slot = self.free_head.ok_or(CacheError::Full)?;
        let idx = slot as usize;

        self.free_head = self.entries[idx].next;
        let entry = &mut self.entries[idx];
        entry.key = key;
        entry.last_used = self.generation;
        entry.epoch = entry.epoch.wrapping_add(1);
        entry.live = true;
        entry.next = None;

        let bucket = key.bucket(self.mask);
        match self.buckets[bucket] {
            None => self.buckets[bucket] = Some(slot),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.entries[tail as usize].next {
                    tail = next;
                }
                self.entries[tail as usize].next = Some(slot);
            }
        }

        self.occupancy += 1;
        Ok(idx)
    }

    /// Handle for a live slot.
    pub fn handle(&self, slot: usize) -> Option<SlotHandle> {
        let entry = self.entries.get(slot)?;
        entry.live.then_some(SlotHandle {
            slot,
            epoch: entry.epoch,
        })
    }

    /// True while the residency that produced `handle` has not been evicted.
    pub fn is_live(&self, handle: SlotHandle) -> bool {
        self.entries
            .get(handle.slot)
            .is_some_and(|e| e.live && e.epoch == handle.epoch)
    }

    /// Key resident in `slot`, if any.
    pub fn key_at(&self, slot: usize) -> Option<SpriteKey> {
        self.entries.get(slot).filter(|e| e.live).map(|e| e.key)
    }

    /// Reclaim every entry not touched in the current generation.
    ///
    /// Returns the number of freed entries, or [`CacheError::NothingStale`]
    /// when every resident entry is live this generation. In that case the
    /// cache is left untouched.
    pub fn evict_stale(&mut self) -> Result<usize, CacheError> {
        let generation = self.generation;
        match self.unlink_where(|entry| entry.last_used != generation) {
            0 => Err(CacheError::NothingStale),
            freed => Ok(freed),
        }
    }

    /// Purge entries whose key matches `predicate`, regardless of recency.
    pub fn invalidate_by<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(SpriteKey) -> bool,
    {
        self.unlink_where(|entry| predicate(entry.key))
    }

    /// Resident `(key, slot)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SpriteKey, usize)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.live)
            .map(|(i, e)| (e.key, i))
    }

    fn unlink_where<F>(&mut self, mut doomed: F) -> usize
    where
        F: FnMut(&SpriteEntry) -> bool,
    {
        let mut freed = 0;
        for bucket in 0..self.buckets.len() {
            let mut prev: Option<u32> = None;
            let mut cursor = self.buckets[bucket];
            while let Some(i) = cursor {
                let next = self.entries[i as usize].next;
                if doomed(&self.entries[i as usize]) {
                    match prev {
                        None => self.buckets[bucket] = next,
                        Some(p) => self.entries[p as usize].next = next,
                    }
                    let entry = &mut self.entries[i as usize];
                    entry.live = false;
                    entry.next = self.free_head;
                    self.free_head = Some(i);
                    freed += 1;
                } else {
                    prev = Some(i);
                }
                cursor = next;
            }
        }
        self.occupancy -= freed;
        freed
    }

    #[cfg(test)]
    fn free_len(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.free_head;
        while let Some(i) = cursor {
            n += 1;
            cursor = self.entries[i as usize].next;
        }
        n
    }
}
