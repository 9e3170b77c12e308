use std::sync::atomic::{AtomicU64, Ordering};

use crate::movegen::Move;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Exact,
    LowerBound,
    UpperBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranspositionEntry {
    pub hash: u64,
    pub depth: u8,
    pub score: i32,
    pub node_type: NodeType,
    pub best_move: Option<Move>,
}

pub const MAX_HASH_MB: usize = 65536;
const ENTRY_BYTES: usize = 16;

/// Shared, lock-free transposition table.
///
/// Each entry is two `AtomicU64`s: `hash ^ data` followed by `data`. A reader
/// recomputes the key from both words, so an entry torn by a concurrent write
/// fails verification and reads as a miss.
///
/// Data layout:
///   bits  0-15  packed move
///   bits 16-31  score (i16)
///   bits 32-39  depth
///   bits 40-41  node type
///   bit  63     always set, so an occupied slot is never zero
pub struct TranspositionTable {
    slots: Vec<AtomicU64>,
    mask: usize,
    size_mb: usize,
}

impl TranspositionTable {
    /// Allocates a table of `size_mb` megabytes. When the allocation fails the
    /// size is halved until it succeeds; at zero the table is disabled and
    /// every probe misses. `size_mb()` reports what was actually allocated.
    pub fn new(size_mb: usize) -> Self {
        let mut size_mb = size_mb.min(MAX_HASH_MB);
        loop {
            match Self::allocate(size_mb) {
                Some(table) => return table,
                None if size_mb == 0 => return Self::disabled(),
                None => {
                    tracing::warn!(size_mb, "transposition table allocation failed, halving");
                    size_mb /= 2;
                }
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            slots: Vec::new(),
            mask: 0,
            size_mb: 0,
        }
    }

    fn allocate(size_mb: usize) -> Option<Self> {
        if size_mb == 0 {
            return Some(Self::disabled());
        }
        // largest power of two that fits in the budget
        let fitting = (size_mb * 1024 * 1024 / ENTRY_BYTES).max(1);
        let entries = 1usize << (usize::BITS - 1 - fitting.leading_zeros());

        let mut slots = Vec::new();
        slots.try_reserve_exact(entries * 2).ok()?;
        slots.resize_with(entries * 2, || AtomicU64::new(0));

        Some(Self {
            slots,
            mask: entries - 1,
            size_mb,
        })
    }

    pub fn size_mb(&self) -> usize {
        self.size_mb
    }

    pub fn is_enabled(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    fn base(&self, hash: u64) -> usize {
        ((hash as usize) & self.mask) * 2
    }

    pub fn probe(&self, hash: u64) -> Option<TranspositionEntry> {
        if self.slots.is_empty() {
            return None;
        }
        let base = self.base(hash);
        let data = self.slots[base + 1].load(Ordering::Relaxed);
        if data == 0 {
            return None;
        }
        let key = self.slots[base].load(Ordering::Relaxed);
        if key ^ data != hash {
            return None;
        }
        Some(unpack(hash, data))
    }

    /// Depth-preferred replacement: a shallower result for a different
    /// position does not evict a deeper one.
    pub fn store(&self, entry: TranspositionEntry) {
        if self.slots.is_empty() {
            return;
        }
        let base = self.base(entry.hash);
        let old_data = self.slots[base + 1].load(Ordering::Relaxed);
        if old_data != 0 {
            let old_hash = self.slots[base].load(Ordering::Relaxed) ^ old_data;
            let old_depth = ((old_data >> 32) & 0xFF) as u8;
            if old_hash != entry.hash && entry.depth < old_depth {
                return;
            }
        }

        let data = pack(&entry);
        self.slots[base].store(entry.hash ^ data, Ordering::Relaxed);
        self.slots[base + 1].store(data, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Occupancy in permille, sampled over the first thousand entries.
    pub fn hashfull(&self) -> u32 {
        let sample = (self.slots.len() / 2).min(1000);
        if sample == 0 {
            return 0;
        }
        let used = (0..sample)
            .filter(|i| self.slots[i * 2 + 1].load(Ordering::Relaxed) != 0)
            .count();
        (used * 1000 / sample) as u32
    }
}

fn pack(entry: &TranspositionEntry) -> u64 {
    let mv = entry.best_move.map_or(0, Move::pack) as u64;
    let score = entry.score.clamp(i16::MIN as i32, i16::MAX as i32) as i16 as u16 as u64;
    let node_type: u64 = match entry.node_type {
        NodeType::Exact => 0,
        NodeType::LowerBound => 1,
        NodeType::UpperBound => 2,
    };
    mv | score << 16 | (entry.depth as u64) << 32 | node_type << 40 | 1 << 63
}

fn unpack(hash: u64, data: u64) -> TranspositionEntry {
    TranspositionEntry {
        hash,
        best_move: Move::unpack((data & 0xFFFF) as u16),
        score: ((data >> 16) & 0xFFFF) as u16 as i16 as i32,
        depth: ((data >> 32) & 0xFF) as u8,
        node_type: match (data >> 40) & 0x3 {
            0 => NodeType::Exact,
            1 => NodeType::LowerBound,
            _ => NodeType::UpperBound,
        },
    }
}
