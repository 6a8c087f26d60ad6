//! Versioned data items.

use crate::vclock::VectorClock;
use serde::{Deserialize, Serialize};

/// A stored value with its causal version. Deletes keep the item around as a
/// tombstone so reconciliation can order them against later writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub value: String,
    pub clock: VectorClock,
    #[serde(default)]
    pub deleted: bool,
}

impl DataItem {
    /// A live item.
    pub fn new(value: impl Into<String>, clock: VectorClock) -> Self {
        Self {
            value: value.into(),
            clock,
            deleted: false,
        }
    }

    /// A delete tombstone.
    pub fn tombstone(clock: VectorClock) -> Self {
        Self {
            value: String::new(),
            clock,
            deleted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossipkv_common::NodeId;

    #[test]
    fn test_tombstone_has_no_value() {
        let mut clock = VectorClock::new();
        clock.increment(&NodeId::new("n1"));
        let item = DataItem::tombstone(clock);
        assert!(item.deleted);
        assert!(item.value.is_empty());
    }

    #[test]
    fn test_serde_defaults_deleted_false() {
        // Items persisted before tombstones existed deserialize as live.
        let json = r#"{"value":"v","clock":{"n1":1}}"#;
        let item: DataItem = serde_json::from_str(json).unwrap();
        assert!(!item.deleted);
        assert_eq!(item.value, "v");
    }
}
