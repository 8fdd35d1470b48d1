//! # Integration Tests Crate
//!
//! Multi-node simulations of the announce protocols without any real
//! sockets: a hub network routes gossip, multicast and direct peer sends
//! between in-process [`validator_announce::AnnounceService`] instances.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! └── src/
//!     ├── lib.rs             # This file
//!     ├── harness.rs         # Hub network + simulated validator cluster
//!     └── announce_flows.rs  # Multi-node scenario tests
//! ```
//!
//! ## Scenarios covered
//!
//! - Cold start: a fresh validator learns its peers' endpoints within one
//!   publication round
//! - Epidemic version-certificate spread across a chain topology
//! - Per-source regossip throttling between nodes
//! - Membership churn: departed validators are pruned everywhere

pub mod announce_flows;
pub mod harness;
