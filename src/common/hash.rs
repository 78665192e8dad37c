//! Hash slots for shardkv
//!
//! - CRC-16 (X.25 / IBM-SDLC parameters) modulo 16384 maps a key to a slot
//! - `HashRing` maps each slot to the primary currently responsible for it
//! - Range splitting uses integer floor division on independent endpoints
//!   so that repeated splits never leave gaps or overlaps

use crc::{Crc, CRC_16_IBM_SDLC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of hash slots in the key space
pub const SLOT_COUNT: usize = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Compute the slot of a key
pub fn slot_index(key: &[u8]) -> u16 {
    CRC16.checksum(key) % SLOT_COUNT as u16
}

/// Half-open interval `[start, end)` of slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end && end as usize <= SLOT_COUNT);
        Self { start, end }
    }

    /// The whole key space
    pub fn full() -> Self {
        Self::new(0, SLOT_COUNT as u16)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot < self.end
    }

    /// Split into `parts` contiguous sub-ranges.
    ///
    /// Part `i` covers `start + floor(i * len / parts) .. start + floor((i + 1) * len / parts)`.
    /// Both endpoints are derived from `i` alone, never from the previous part.
    pub fn split(&self, parts: usize) -> Vec<SlotRange> {
        if parts == 0 {
            return Vec::new();
        }
        let len = self.len() as u64;
        let parts_u64 = parts as u64;
        (0..parts_u64)
            .map(|i| {
                let lo = self.start as u64 + i * len / parts_u64;
                let hi = self.start as u64 + (i + 1) * len / parts_u64;
                SlotRange::new(lo as u16, hi as u16)
            })
            .collect()
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Anything that can own slots on the ring
pub trait SlotOwner: Clone {
    fn address(&self) -> &str;
}

impl SlotOwner for String {
    fn address(&self) -> &str {
        self
    }
}

/// Slot table plus the ranges each owner accumulated
pub struct HashRing<N: SlotOwner> {
    slots: Vec<Option<N>>,
    ranges: HashMap<String, Vec<SlotRange>>,
}

impl<N: SlotOwner> HashRing<N> {
    pub fn new() -> Self {
        Self {
            slots: vec![None; SLOT_COUNT],
            ranges: HashMap::new(),
        }
    }

    /// Partition the full key space evenly across `owners`
    pub fn assign_initial(&mut self, owners: &[N]) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.ranges.clear();

        for (owner, range) in owners.iter().zip(SlotRange::full().split(owners.len())) {
            self.assign_range(owner, range);
            tracing::info!(node = %owner.address(), range = %range, "Hash slots assigned");
        }
    }

    /// Point every slot of `range` at `owner` and record the range
    pub fn assign_range(&mut self, owner: &N, range: SlotRange) {
        if range.is_empty() {
            return;
        }
        for slot in &mut self.slots[range.start as usize..range.end as usize] {
            *slot = Some(owner.clone());
        }
        self.ranges
            .entry(owner.address().to_string())
            .or_default()
            .push(range);
    }

    /// Owner of a slot, `None` only before the initial assignment
    pub fn lookup(&self, slot: u16) -> Option<&N> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    pub fn ranges_of(&self, address: &str) -> &[SlotRange] {
        self.ranges
            .get(address)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    /// Forget the ranges of `address` and return them
    pub fn take_ranges(&mut self, address: &str) -> Vec<SlotRange> {
        self.ranges.remove(address).unwrap_or_default()
    }

    /// Hand every range of `from` over to `to`
    pub fn transfer(&mut self, from: &str, to: &N) -> Vec<SlotRange> {
        let ranges = self.take_ranges(from);
        for range in &ranges {
            self.assign_range(to, *range);
        }
        ranges
    }

    /// Every owner and its ranges
    pub fn owners(&self) -> impl Iterator<Item = (&str, &[SlotRange])> {
        self.ranges.iter().map(|(a, r)| (a.as_str(), r.as_slice()))
    }

    /// Number of slots currently pointing at `address`
    pub fn slot_count_of(&self, address: &str) -> usize {
        self.slots
            .iter()
            .filter(|s| s.as_ref().map(|n| n.address() == address).unwrap_or(false))
            .count()
    }
}

impl<N: SlotOwner> Default for HashRing<N> {
    fn default() -> Self {
        Self::new()
    }
}
