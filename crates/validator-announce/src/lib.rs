//! # Validator Announce Subsystem
//!
//! Gossip protocols by which validators in a permissioned set discover one
//! another's current network endpoints (enode URLs) privately and with
//! versioned freshness guarantees.
//!
//! ## Architecture Role
//!
//! ```text
//!                    ┌──────────────────────────┐
//!   peer messages ──→│      AnnounceService     │──→ gossip / multicast
//!   (transport)      │  ┌────────┐ ┌──────────┐ │    (transport port)
//!                    │  │ tables │ │ announce │ │
//!                    │  │ (kv)   │ │   loop   │ │←── tickers + requests
//!                    │  └────────┘ └──────────┘ │
//!                    └──────────────────────────┘
//! ```
//!
//! Three interacting message kinds flow through the service:
//!
//! - **query-enode**: "here is my endpoint, encrypted to each of you" —
//!   asks destinations to answer with their enode certificate
//! - **version-certificates**: signed `{version}` statements proving a
//!   validator has advanced, without leaking its endpoint
//! - **enode-certificate**: signed `{enode_url, version}` delivered to
//!   validators only
//!
//! Plaintext enode URLs never reach non-validators: query-enode payloads
//! are ECIES-encrypted per destination and enode certificates are only
//! multicast to the validator connection set.

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;
pub mod tables;

pub use domain::config::AnnounceConfig;
pub use error::AnnounceError;
pub use ports::inbound::AnnounceApi;
pub use service::AnnounceService;
