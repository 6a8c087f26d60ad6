//! gossipkv-engine: the replicated KV engine.
//!
//! Owns the in-memory data map, per-key vector clocks, the hinted-handoff
//! map and the paged persistence handle. The gossip fabric drives it through
//! [`KvEngine::put`] / [`KvEngine::get`] / [`KvEngine::reconcile`]; a
//! background task drains hints once their targets come back.

pub mod engine;
pub mod handoff;
pub mod hints;
pub mod item;
pub mod vclock;

pub use engine::{EngineError, KvEngine, LivenessView, Lookup, PutOutcome, ReconcileOutcome};
pub use handoff::{spawn_handoff_drainer, DEFAULT_HANDOFF_INTERVAL};
pub use hints::Hint;
pub use item::DataItem;
pub use vclock::{ClockOrder, VectorClock};
