use crate::membership::types::Address;

use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

/// Hashes keys into segments through SHA-256, so every member agrees on ownership
/// regardless of the toolchain it was built with.
struct SegmentHasher(Sha256);

impl Hasher for SegmentHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finish(&self) -> u64 {
        let digest = self.0.clone().finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }
}

/// Key ownership of a cache topology.
///
/// Keys hash into a fixed number of segments; segment `s` is owned primarily by
/// member `s % n` of the sorted member list, with backups on the following members.
/// Every member computes the same owners for the same topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentHash {
    segments: u32,
    members: Vec<Address>,
}

impl ConsistentHash {
    pub const DEFAULT_SEGMENTS: u32 = 256;

    pub fn new(members: impl IntoIterator<Item = Address>) -> Self {
        Self::with_segments(Self::DEFAULT_SEGMENTS, members)
    }

    pub fn with_segments(segments: u32, members: impl IntoIterator<Item = Address>) -> Self {
        let mut members: Vec<Address> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Self {
            segments: segments.max(1),
            members,
        }
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.binary_search(address).is_ok()
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn segment<K: Hash + ?Sized>(&self, key: &K) -> u32 {
        let mut hasher = SegmentHasher(Sha256::new());
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.segments)) as u32
    }

    pub fn primary_owner<K: Hash + ?Sized>(&self, key: &K) -> Option<&Address> {
        if self.members.is_empty() {
            return None;
        }
        let index = self.segment(key) as usize % self.members.len();
        Some(&self.members[index])
    }

    /// Primary followed by up to `backups` distinct backup owners.
    pub fn owners<K: Hash + ?Sized>(&self, key: &K, backups: usize) -> Vec<&Address> {
        if self.members.is_empty() {
            return Vec::new();
        }
        let primary = self.segment(key) as usize;
        let count = (backups + 1).min(self.members.len());
        (0..count)
            .map(|offset| &self.members[(primary + offset) % self.members.len()])
            .collect()
    }

    pub fn is_primary<K: Hash + ?Sized>(&self, key: &K, address: &Address) -> bool {
        self.primary_owner(key) == Some(address)
    }
}
