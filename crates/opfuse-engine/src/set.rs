//! Immutable super-instruction sets with value identity.
//!
//! A set is its encoding: the sorted, duplicate-free ids packed as 4-byte
//! little-endian words. Hash and equality derive from those bytes, so a set
//! works directly as a memoization key. Every operation returns a fresh
//! value; clones share the underlying buffer.

use opfuse_catalog::SuperInstructionId;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstructionSet {
    encoded: Arc<[u8]>,
}

impl InstructionSet {
    pub fn empty() -> Self {
        Self::from_encoded(Vec::new())
    }

    pub fn singleton(id: SuperInstructionId) -> Self {
        Self::from_encoded(id.as_u32().to_le_bytes().to_vec())
    }

    /// Sorts ascending, collapses duplicates, packs.
    pub fn from_ids(ids: &[SuperInstructionId]) -> Self {
        let mut sorted: Vec<u32> = ids.iter().map(|id| id.as_u32()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut encoded = Vec::with_capacity(sorted.len() * 4);
        for id in sorted {
            encoded.extend_from_slice(&id.to_le_bytes());
        }
        Self::from_encoded(encoded)
    }

    /// Wrap an already-encoded byte string. A length that is not a multiple
    /// of 4 is a corrupted encoding and aborts.
    pub fn from_encoded(encoded: Vec<u8>) -> Self {
        assert!(
            encoded.len() % 4 == 0,
            "invalid encoded instruction set length: {} is not a multiple of 4",
            encoded.len()
        );
        Self {
            encoded: encoded.into(),
        }
    }

    #[inline]
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.encoded.len() / 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    #[inline]
    pub fn at(&self, pos: usize) -> SuperInstructionId {
        let bytes: [u8; 4] = self.encoded[4 * pos..4 * pos + 4].try_into().unwrap();
        SuperInstructionId::from_u32(u32::from_le_bytes(bytes))
    }

    /// Largest member; `None` for the empty set.
    pub fn max_id(&self) -> Option<SuperInstructionId> {
        if self.is_empty() {
            None
        } else {
            Some(self.at(self.size() - 1))
        }
    }

    /// Linear scan; sets hold at most a search budget's worth of ids.
    pub fn contains(&self, id: SuperInstructionId) -> bool {
        (0..self.size()).any(|pos| self.at(pos) == id)
    }

    pub fn contains_all(&self, other: &InstructionSet) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }

        let mut i = 0;
        let mut j = 0;
        while i < self.size() && j < other.size() {
            let next_a = self.at(i);
            let next_b = other.at(j);
            if next_a < next_b {
                i += 1;
                continue;
            }
            if next_b < next_a {
                return false;
            }
            i += 1;
            j += 1;
        }
        j >= other.size()
    }

    pub fn union(&self, other: &InstructionSet) -> InstructionSet {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        let mut encoded = Vec::with_capacity(self.encoded.len() + other.encoded.len());
        let mut i = 0;
        let mut j = 0;
        while i < self.size() && j < other.size() {
            let next_a = self.at(i);
            let next_b = other.at(j);
            if next_a < next_b {
                encoded.extend_from_slice(&next_a.as_u32().to_le_bytes());
                i += 1;
            } else if next_a == next_b {
                encoded.extend_from_slice(&next_a.as_u32().to_le_bytes());
                i += 1;
                j += 1;
            } else {
                encoded.extend_from_slice(&next_b.as_u32().to_le_bytes());
                j += 1;
            }
        }
        encoded.extend_from_slice(&self.encoded[4 * i..]);
        encoded.extend_from_slice(&other.encoded[4 * j..]);

        InstructionSet::from_encoded(encoded)
    }

    pub fn intersect(&self, other: &InstructionSet) -> InstructionSet {
        if self.is_empty() || other.is_empty() {
            return InstructionSet::empty();
        }

        let mut encoded = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < self.size() && j < other.size() {
            let next_a = self.at(i);
            let next_b = other.at(j);
            if next_a < next_b {
                i += 1;
            } else if next_b < next_a {
                j += 1;
            } else {
                encoded.extend_from_slice(&next_a.as_u32().to_le_bytes());
                i += 1;
                j += 1;
            }
        }
        InstructionSet::from_encoded(encoded)
    }

    pub fn difference(&self, other: &InstructionSet) -> InstructionSet {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }

        let mut encoded = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < self.size() && j < other.size() {
            let next_a = self.at(i);
            let next_b = other.at(j);
            if next_a < next_b {
                encoded.extend_from_slice(&next_a.as_u32().to_le_bytes());
                i += 1;
            } else if next_b < next_a {
                j += 1;
            } else {
                i += 1;
                j += 1;
            }
        }
        encoded.extend_from_slice(&self.encoded[4 * i..]);

        InstructionSet::from_encoded(encoded)
    }

    pub fn add(&self, id: SuperInstructionId) -> InstructionSet {
        if self.contains(id) {
            return self.clone();
        }
        self.union(&InstructionSet::singleton(id))
    }

    pub fn remove(&self, id: SuperInstructionId) -> InstructionSet {
        if !self.contains(id) {
            return self.clone();
        }
        self.difference(&InstructionSet::singleton(id))
    }

    /// All `2^size` subsets, pairwise distinct, union equal to `self`.
    pub fn subsets(&self) -> Vec<InstructionSet> {
        let num = 1usize << self.size();
        let mut res = Vec::with_capacity(num);
        for mask in 0..num {
            let mut cur = InstructionSet::empty();
            for pos in 0..self.size() {
                if mask >> pos & 1 != 0 {
                    cur = cur.add(self.at(pos));
                }
            }
            res.push(cur);
        }
        res
    }

    /// Membership view for the evaluator's inner loops.
    pub fn decode(&self) -> SetMembership {
        SetMembership {
            ids: (0..self.size()).map(|pos| self.at(pos).as_u32()).collect(),
        }
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for pos in 0..self.size() {
            if pos > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", self.at(pos))?;
        }
        f.write_str("}")
    }
}

/// Decoded, sorted id list backing the evaluator's membership tests.
#[derive(Debug, Clone)]
pub struct SetMembership {
    ids: Vec<u32>,
}

impl SetMembership {
    #[inline]
    pub fn contains(&self, id: SuperInstructionId) -> bool {
        self.ids.binary_search(&id.as_u32()).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
