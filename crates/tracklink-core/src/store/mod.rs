// ── Snapshot storage ──
//
// In-memory cache with push-based change notification, plus the durable
// record that lets a restart resume where the last process left off.

mod cache;
mod persist;

pub use cache::SnapshotCache;
pub use persist::{FileStateStore, MemoryStateStore, PersistedState, StateStore};
