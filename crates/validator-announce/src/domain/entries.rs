//! Val-enode table entries.

use crate::domain::enode::EnodeUrl;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::PublicKeyBytes;
use shared_types::{Address, Version};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One row of the val-enode table, keyed by validator address.
///
/// Invariants maintained by the table's upsert operations:
/// - `version <= highest_known_version`
/// - `highest_known_version` never decreases
/// - `num_query_attempts_for_hk_version` resets to zero whenever
///   `highest_known_version` advances
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// The validator this entry describes.
    pub address: Address,
    /// Last-known enode URL, if any was ever learned.
    pub node: Option<EnodeUrl>,
    /// Version at which `node` was learned.
    pub version: Version,
    /// Largest version seen anywhere for this address; may run ahead of
    /// `version` while the matching enode is still unknown.
    pub highest_known_version: Version,
    /// Public key used to encrypt enode URLs destined for this validator.
    #[serde_as(as = "Option<Bytes>")]
    pub public_key: Option<PublicKeyBytes>,
    /// Unanswered query attempts targeting the current
    /// `highest_known_version`.
    pub num_query_attempts_for_hk_version: u32,
    /// Wall-clock seconds of the last query attempt.
    pub last_query_timestamp: Option<u64>,
}

impl AddressEntry {
    /// A fresh entry with no known enode or version.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            node: None,
            version: 0,
            highest_known_version: 0,
            public_key: None,
            num_query_attempts_for_hk_version: 0,
            last_query_timestamp: None,
        }
    }

    /// Whether a backoff-enforcing query publication should skip this entry.
    ///
    /// Skips iff at least one attempt was already made and the last attempt
    /// is younger than `5 * 1.5^min(attempts - 1, 5)` minutes (whole-minute
    /// truncation, so the cap lands at 37 minutes).
    pub fn within_retry_backoff(&self, now_secs: u64) -> bool {
        if self.num_query_attempts_for_hk_version == 0 {
            return false;
        }
        let Some(last_query) = self.last_query_timestamp else {
            return false;
        };
        let elapsed = Duration::from_secs(now_secs.saturating_sub(last_query));
        elapsed < retry_backoff(self.num_query_attempts_for_hk_version)
    }
}

/// Backoff window after `attempts` unanswered queries.
pub fn retry_backoff(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(5);
    let minutes = (1.5f64.powi(exponent as i32) * 5.0) as u64;
    Duration::from_secs(minutes * 60)
}

/// Seconds since the Unix epoch as the 32-bit wire version.
///
/// Truncates in 2106; widening requires a wire envelope revision.
pub fn unix_now() -> Version {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as Version
}
