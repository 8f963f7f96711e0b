//! Connectivity manager daemon - aggregate readiness orchestration
//!
//! connmgrd turns raw per-interface signals (admin state, carrier,
//! address acquisition, duplicate-address detection) into a single,
//! debounced notion of "the network is usable":
//! - a shared interface state table with per-slot readiness bits
//! - a readiness monitor emitting coalesced edge-only events
//! - a binding layer driving pluggable connectivity backends
//!   (auto-connect, auto-down, connect and idle timeouts)
//! - an online reachability verifier with a Trickle-paced
//!   consistency check

pub mod backend;
pub mod binding;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod online;
pub mod probe;
pub mod registry;
pub mod state_table;
pub mod trickle;

mod ingest;

pub use backend::ConnectivityBackend;
pub use binding::{BindingConfig, BindingFlag};
pub use config::{CheckStrategy, ConnMgrConfig, OnlineCheckConfig};
pub use error::{ConnMgrError, Result};
pub use events::{ConnEvent, NetEvent};
pub use manager::ConnMgr;
pub use probe::{HttpTarget, ReachabilityProbe, SystemProbe};
pub use registry::{IfaceRegistry, InMemoryRegistry};
pub use trickle::Trickle;
