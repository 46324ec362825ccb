//! Engine ranks and rank sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-wide identity of a joined engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(pub u32);

impl Rank {
    /// Sentinel for "no rank" (engine not yet joined, or no rank filter).
    pub const NIL: Rank = Rank(u32::MAX);

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Rank {
    fn from(r: u32) -> Self {
        Rank(r)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "NilRank")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Convert a wire rank list into ranks.
pub fn ranks_from_u32(ranks: &[u32]) -> Vec<Rank> {
    ranks.iter().copied().map(Rank).collect()
}

/// Convert ranks into a wire rank list.
pub fn ranks_to_u32(ranks: &[Rank]) -> Vec<u32> {
    ranks.iter().map(|r| r.0).collect()
}

/// Ordered, de-duplicated set of ranks.
///
/// Displays in compressed range form, e.g. `[0-3,5,7-8]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankSet {
    ranks: BTreeSet<Rank>,
}

impl RankSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rank: Rank) -> bool {
        self.ranks.insert(rank)
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.ranks.contains(&rank)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rank> + '_ {
        self.ranks.iter().copied()
    }

    /// Ranks in ascending order.
    pub fn to_vec(&self) -> Vec<Rank> {
        self.ranks.iter().copied().collect()
    }
}

impl FromIterator<Rank> for RankSet {
    fn from_iter<I: IntoIterator<Item = Rank>>(iter: I) -> Self {
        Self {
            ranks: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for RankSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for rank in &self.ranks {
            match ranges.last_mut() {
                Some((_, hi)) if *hi + 1 == rank.0 => *hi = rank.0,
                _ => ranges.push((rank.0, rank.0)),
            }
        }

        let parts: Vec<String> = ranges
            .into_iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    lo.to_string()
                } else {
                    format!("{lo}-{hi}")
                }
            })
            .collect();
        write!(f, "[{}]", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_rank_display() {
        assert_eq!(Rank::NIL.to_string(), "NilRank");
        assert_eq!(Rank(3).to_string(), "3");
        assert!(Rank::NIL.is_nil());
    }

    #[test]
    fn rank_set_sorts_and_dedups() {
        let set: RankSet = [Rank(5), Rank(1), Rank(5), Rank(0)].into_iter().collect();
        assert_eq!(set.to_vec(), vec![Rank(0), Rank(1), Rank(5)]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn rank_set_display_compresses_ranges() {
        let set: RankSet = [0, 1, 2, 3, 5, 7, 8].into_iter().map(Rank).collect();
        assert_eq!(set.to_string(), "[0-3,5,7-8]");
        assert_eq!(RankSet::new().to_string(), "[]");
    }

    #[test]
    fn rank_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&Rank(7)).unwrap(), "7");
        let back: Rank = serde_json::from_str("7").unwrap();
        assert_eq!(back, Rank(7));
    }
}
