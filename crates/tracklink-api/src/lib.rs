// tracklink-api: Async Rust client for GPS tracking server APIs

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod reports;
pub mod resources;
pub mod transport;

pub use auth::{Credentials, SessionCookie};
pub use client::TrackClient;
pub use error::Error;
pub use models::{
    Attributes, DeviceRecord, EventQuery, EventRecord, GeofenceRecord, PositionRecord, ServerInfo,
};
pub use transport::{TlsMode, TransportConfig};
