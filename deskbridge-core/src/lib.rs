//! # deskbridge-core
//!
//! Remote-desktop protocol bridge library: routes a client session to the
//! backend desktop that serves it and relays RFB between the two.
//!
//! This crate contains:
//! - **Registry**: `SessionRegistry` resolving session ids to endpoints
//!   through a TTL cache in front of a durable `SessionStore`
//! - **Resilience**: `Policy` wrapping outbound calls with bounded,
//!   jittered retries and a per-category `CircuitBreaker`
//! - **Action**: validated `ActionRequest`s and key-combination parsing
//! - **RFB**: wire codec, handshake, and the `ProtocolClient`
//!   implementations (framed, raw fallback, mock)
//! - **State**: the `SessionPhase` machine for one bridged connection
//! - **Bridge**: structured (JSON) and raw (byte) relays
//! - **Error**: `BridgeError`, the `thiserror`-based error taxonomy

pub mod action;
pub mod bridge;
pub mod error;
pub mod registry;
pub mod resilience;
pub mod rfb;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use action::{ActionRequest, Key, KeyCombination, Modifier, MouseButton, NamedKey};
pub use bridge::{
    ActionOutcome, Bridge, BridgeConfig, BridgeSession, ClientFrame, OutboundMessage, RelayMode,
    ServerFrame, SessionReport,
};
pub use error::{BridgeError, ErrorKind};
pub use registry::{
    CacheStats, Endpoint, EndpointCache, HttpSessionStore, SessionRecord, SessionRegistry,
    SessionStatus, SessionStore, StaticSessionStore,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Policy, RetryConfig};
pub use rfb::{
    ClientFactory, ClientOptions, ClientVariant, InputTiming, MockBackend, ProtocolClient,
    Screenshot,
};
pub use state::{PhaseLog, SessionPhase};
