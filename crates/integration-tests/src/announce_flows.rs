//! Multi-node announce protocol scenarios.
