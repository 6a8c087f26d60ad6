//! Vector clock implementation for causal versioning.

use gossipkv_common::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A vector clock: maps node identifiers to monotonic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: HashMap<NodeId, u64>,
}

/// Outcome of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrder {
    /// `other` causally follows `self`.
    Less,
    /// `self` causally follows `other`.
    Greater,
    /// Identical clocks.
    Equal,
    /// Neither follows the other — concurrent writes.
    Concurrent,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a raw map (wire and storage layers carry plain maps).
    pub fn from_map(entries: HashMap<String, u64>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (NodeId::from(k), v))
                .collect(),
        }
    }

    /// Convert to a raw map.
    pub fn into_map(self) -> HashMap<String, u64> {
        self.entries
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect()
    }

    /// The counter for a node (0 if not present).
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries.get(node).map_or(0, |counter| *counter)
    }

    /// Bump the counter for `node` by one.
    pub fn increment(&mut self, node: &NodeId) {
        *self.entries.entry(node.clone()).or_insert(0) += 1;
    }

    /// Element-wise maximum with `other`. Counters never decrease.
    pub fn merge(&mut self, other: &Self) {
        for (node, &theirs) in &other.entries {
            match self.entries.get_mut(node) {
                Some(ours) => *ours = theirs.max(*ours),
                None => {
                    self.entries.insert(node.clone(), theirs);
                }
            }
        }
    }

    /// Compare two clocks, treating missing entries as 0.
    pub fn compare(&self, other: &Self) -> ClockOrder {
        let mut any_less = false;
        let mut any_greater = false;

        for (node, &ours) in &self.entries {
            let theirs = other.get(node);
            if ours < theirs {
                any_less = true;
            }
            if ours > theirs {
                any_greater = true;
            }
        }
        for (node, &theirs) in &other.entries {
            if !self.entries.contains_key(node) && theirs > 0 {
                any_less = true;
            }
        }

        match (any_less, any_greater) {
            (false, false) => ClockOrder::Equal,
            (true, false) => ClockOrder::Less,
            (false, true) => ClockOrder::Greater,
            (true, true) => ClockOrder::Concurrent,
        }
    }

    pub fn entries(&self) -> &HashMap<NodeId, u64> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(pairs: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_map(pairs.iter().map(|&(node, n)| (node.to_string(), n)).collect())
    }

    #[test]
    fn test_increment() {
        let mut clock = VectorClock::new();
        let a = NodeId::new("a");
        let b = NodeId::new("b");
        clock.increment(&a);
        assert_eq!(clock.get(&a), 1);
        clock.increment(&a);
        assert_eq!(clock.get(&a), 2);
        clock.increment(&b);
        assert_eq!(clock.get(&a), 2);
        assert_eq!(clock.get(&b), 1);
    }

    #[test]
    fn test_merge_elementwise_max() {
        let mut a = vc(&[("n1", 4), ("n2", 1)]);
        let b = vc(&[("n1", 2), ("n2", 6), ("n3", 3)]);
        a.merge(&b);
        assert_eq!(a.get(&NodeId::new("n1")), 4);
        assert_eq!(a.get(&NodeId::new("n2")), 6);
        assert_eq!(a.get(&NodeId::new("n3")), 3);
    }

    #[test]
    fn test_merge_dominates_both_inputs() {
        let a = vc(&[("n1", 2), ("n2", 1)]);
        let b = vc(&[("n1", 1), ("n2", 2)]);
        let mut merged = a.clone();
        merged.merge(&b);
        assert!(matches!(
            merged.compare(&a),
            ClockOrder::Greater | ClockOrder::Equal
        ));
        assert!(matches!(
            merged.compare(&b),
            ClockOrder::Greater | ClockOrder::Equal
        ));
    }

    #[test]
    fn test_compare_equal() {
        let a = vc(&[("n1", 1), ("n2", 2)]);
        let b = vc(&[("n1", 1), ("n2", 2)]);
        assert_eq!(a.compare(&b), ClockOrder::Equal);
        assert_eq!(vc(&[]).compare(&vc(&[])), ClockOrder::Equal);
    }

    #[test]
    fn test_compare_greater() {
        let a = vc(&[("n1", 2)]);
        let b = vc(&[("n1", 1)]);
        assert_eq!(a.compare(&b), ClockOrder::Greater);
    }

    #[test]
    fn test_compare_less_with_missing_entry() {
        let a = vc(&[]);
        let b = vc(&[("n1", 1)]);
        assert_eq!(a.compare(&b), ClockOrder::Less);
    }

    #[test]
    fn test_compare_concurrent() {
        let a = vc(&[("n1", 2), ("n2", 1)]);
        let b = vc(&[("n1", 1), ("n2", 2)]);
        assert_eq!(a.compare(&b), ClockOrder::Concurrent);
    }

    #[test]
    fn test_compare_disjoint_keys_concurrent() {
        let a = vc(&[("n1", 1)]);
        let b = vc(&[("n2", 1)]);
        assert_eq!(a.compare(&b), ClockOrder::Concurrent);
    }

    #[test]
    fn test_compare_antisymmetric() {
        let cases = [
            (vc(&[("n1", 2)]), vc(&[("n1", 1)])),
            (vc(&[("n1", 1)]), vc(&[("n1", 1)])),
            (vc(&[("n1", 2), ("n2", 1)]), vc(&[("n1", 1), ("n2", 2)])),
            (vc(&[]), vc(&[("n1", 1)])),
        ];
        for (a, b) in cases {
            let forward = a.compare(&b);
            let backward = b.compare(&a);
            let expected = match forward {
                ClockOrder::Less => ClockOrder::Greater,
                ClockOrder::Greater => ClockOrder::Less,
                other => other,
            };
            assert_eq!(backward, expected, "a={:?} b={:?}", a, b);
        }
    }

    #[test]
    fn test_roundtrip_raw_map() {
        let clock = vc(&[("n1", 3), ("n2", 7)]);
        let back = VectorClock::from_map(clock.clone().into_map());
        assert_eq!(back, clock);
    }
}
