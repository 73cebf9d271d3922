// tracklink-core: Resilient acquisition layer between tracklink-api and consumers.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod event;
pub mod grace;
pub mod model;
pub mod session;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::{BackoffPolicy, RetryState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MIN_POLL_INTERVAL, PositionFilter, TlsVerification, TrackerConfig};
pub use controller::{Diagnostics, PollOutcome, PollResult, Tracker};
pub use error::{AuthError, CoreError, FetchError, PersistError, UpstreamError};
pub use event::{ConnectivityChanged, DeviceEvent, TrackerEvent};
pub use grace::{DEFAULT_GRACE_WINDOW, GraceMode, GraceState};
pub use model::{Attributes, Availability, DeviceId, DeviceSnapshot, GeofenceRef, Position};
pub use session::{Session, SessionManager, SessionPolicy, SessionStatus};
pub use store::{FileStateStore, MemoryStateStore, PersistedState, SnapshotCache, StateStore};

pub use tracklink_api::{Credentials, ServerInfo};
