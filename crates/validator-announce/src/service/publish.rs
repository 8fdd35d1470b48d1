//! Publication paths: version bumps, enode certificates and query-enode
//! generation.

use crate::domain::entries::{unix_now, AddressEntry};
use crate::domain::enode::EnodeUrl;
use crate::domain::enode_certificate::EnodeCertificate;
use crate::domain::message::{
    Message, ENODE_CERTIFICATE_MSG, QUERY_ENODE_MSG, VERSION_CERTIFICATES_MSG,
};
use crate::domain::query_enode::{EncryptedEnodeUrl, QueryEnodeData};
use crate::domain::version_certificate::{encode_certificates, VersionCertificate};
use crate::error::AnnounceError;
use crate::service::AnnounceService;
use shared_crypto::ecies_encrypt;
use shared_types::{fmt_address, Address, NodeId, Version};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

impl AnnounceService {
    /// Bump the announce version to the current timestamp if that moves it
    /// forward, sharing the new version before storing it. Errors are
    /// logged; the caller's loop continues regardless.
    pub(crate) fn update_announce_version_now(&self) {
        let candidate = unix_now();
        let current = self.announce_version_inner();
        if candidate <= current {
            debug!(
                existing = current,
                attempted = candidate,
                "Announce version is not newer than the existing version"
            );
            return;
        }
        if let Err(error) = self.set_and_share_updated_announce_version(candidate) {
            warn!(%error, "Error updating announce version");
            return;
        }
        debug!(version = candidate, "Updating announce version");
        self.store_announce_version(candidate);
    }

    /// Install fresh enode certificates at `version`, deliver them to the
    /// validator connection set, and gossip a new self version
    /// certificate. No-op when this node is not in the set.
    pub(crate) fn set_and_share_updated_announce_version(
        &self,
        version: Version,
    ) -> Result<(), AnnounceError> {
        let conn_set = self.directory.validator_conn_set()?;
        if !conn_set.contains(&self.identity.address()) {
            trace!("Not in the validator conn set, not updating announce version");
            return Ok(());
        }

        let certificate_msgs = self.generate_enode_certificate_msgs(version)?;
        if !certificate_msgs.is_empty() {
            self.set_enode_certificate_msg_map_inner(certificate_msgs.clone())?;
        }

        let dest_addresses: Vec<Address> = conn_set.iter().copied().collect();
        match &self.proxy {
            Some(proxy) => {
                let proxy_payloads: HashMap<NodeId, Vec<u8>> = certificate_msgs
                    .iter()
                    .map(|(node_id, msg)| (*node_id, msg.payload()))
                    .collect();
                proxy.send_forward_msg(&dest_addresses, ENODE_CERTIFICATE_MSG, proxy_payloads)?;
            }
            None => {
                let self_id = self.network.self_node().node_id();
                if let Some(msg) = certificate_msgs.get(&self_id) {
                    self.network.multicast(
                        &dest_addresses,
                        &msg.payload(),
                        ENODE_CERTIFICATE_MSG,
                        false,
                    )?;
                }
            }
        }

        let certificate = VersionCertificate::create(
            version,
            self.identity.address(),
            self.identity.public_key(),
            |prehash| self.identity.sign(prehash),
        )?;
        self.upsert_and_gossip_version_certificate_entries(vec![certificate])
    }

    /// One signed enode certificate per externally reachable node: self
    /// for a standalone validator, one per peered proxy when proxied. All
    /// certificates carry the same `version`.
    pub(crate) fn generate_enode_certificate_msgs(
        &self,
        version: Version,
    ) -> Result<HashMap<NodeId, Message>, AnnounceError> {
        let external_enodes: Vec<EnodeUrl> = match &self.proxy {
            Some(proxy) => proxy.proxy_external_nodes()?,
            None => vec![self.network.self_node()],
        };

        let mut msgs = HashMap::with_capacity(external_enodes.len());
        for node in external_enodes {
            msgs.insert(node.node_id(), self.signed_enode_certificate(&node, version)?);
        }
        trace!(count = msgs.len(), "Generated enode certificate messages");
        Ok(msgs)
    }

    /// A signed enode certificate message for `node` at the current
    /// announce version.
    pub(crate) fn generate_enode_certificate_msg_inner(
        &self,
        node: &EnodeUrl,
    ) -> Result<Message, AnnounceError> {
        self.signed_enode_certificate(node, self.announce_version_inner())
    }

    fn signed_enode_certificate(
        &self,
        node: &EnodeUrl,
        version: Version,
    ) -> Result<Message, AnnounceError> {
        let certificate = EnodeCertificate {
            enode_url: node.to_string(),
            version,
        };
        let mut msg = Message::new(
            ENODE_CERTIFICATE_MSG,
            self.identity.address(),
            certificate.to_bytes(),
        );
        msg.sign_with(|prehash| self.identity.sign(prehash))?;
        Ok(msg)
    }

    /// Build, sign and gossip a query-enode message carrying this node's
    /// external URL encrypted to every stale destination, then record the
    /// query attempts. Emits nothing when no destination qualifies.
    pub(crate) fn generate_and_gossip_query_enode(
        &self,
        version: Version,
        enforce_retry_backoff: bool,
    ) -> Result<(), AnnounceError> {
        trace!(version, enforce_retry_backoff, "Generating query-enode message");
        let candidates = self.query_enode_candidate_entries(enforce_retry_backoff)?;

        let proxy_assignments = match &self.proxy {
            Some(proxy) => Some(proxy.validator_proxy_assignments()?),
            None => None,
        };
        let self_url = self.network.self_node().to_string();

        let mut encrypted_enode_urls = Vec::new();
        let mut queried = Vec::new();
        for entry in candidates {
            let Some(public_key) = entry.public_key else {
                continue;
            };
            // A proxied validator advertises the assigned proxy's URL per
            // destination; destinations without an assignment are skipped.
            let external_url = match &proxy_assignments {
                Some(assignments) => match assignments.get(&entry.address) {
                    Some(proxy_node) => proxy_node.to_string(),
                    None => continue,
                },
                None => self_url.clone(),
            };

            match ecies_encrypt(&public_key, external_url.as_bytes()) {
                Ok(ciphertext) => {
                    encrypted_enode_urls.push(EncryptedEnodeUrl {
                        dest_address: entry.address,
                        ciphertext,
                    });
                    queried.push(entry.address);
                }
                Err(error) => {
                    warn!(
                        address = %fmt_address(&entry.address),
                        %error,
                        "Error encrypting enode URL for destination"
                    );
                }
            }
        }

        if encrypted_enode_urls.is_empty() {
            trace!("No encrypted enode URLs were generated, not gossiping");
            return Ok(());
        }

        let data = QueryEnodeData {
            encrypted_enode_urls,
            version,
            timestamp: unix_now(),
        };
        let mut msg = Message::new(QUERY_ENODE_MSG, self.identity.address(), data.to_bytes());
        msg.sign_with(|prehash| self.identity.sign(prehash))?;

        self.network.gossip(&msg.payload(), QUERY_ENODE_MSG)?;
        self.val_enode_table.update_query_enode_stats(&queried)?;
        Ok(())
    }

    /// Val-enode entries worth querying: not self, version behind the
    /// highest known one, public key present, and outside the retry
    /// backoff window when enforcement is on.
    fn query_enode_candidate_entries(
        &self,
        enforce_retry_backoff: bool,
    ) -> Result<Vec<AddressEntry>, AnnounceError> {
        let entries = self.val_enode_table.get_val_enodes(None)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut candidates = Vec::new();
        for (address, entry) in entries {
            if address == self.identity.address() {
                continue;
            }
            if entry.version == entry.highest_known_version {
                continue;
            }
            if entry.public_key.is_none() {
                warn!(
                    address = %fmt_address(&address),
                    "Cannot build an encrypted enode URL for an entry without a public key"
                );
                continue;
            }
            if enforce_retry_backoff && entry.within_retry_backoff(now) {
                continue;
            }
            candidates.push(entry);
        }
        Ok(candidates)
    }

    /// Gossip a batch of version certificates inside an unsigned envelope.
    pub(crate) fn gossip_version_certificates(
        &self,
        certificates: &[VersionCertificate],
    ) -> Result<(), AnnounceError> {
        let msg = Message::unsigned(VERSION_CERTIFICATES_MSG, encode_certificates(certificates));
        self.network.gossip(&msg.payload(), VERSION_CERTIFICATES_MSG)
    }

    /// Gossip the entire version certificate table. Receivers upsert the
    /// entries that are new to them and regossip only those, so the
    /// periodic full share converges without duplicate amplification.
    pub(crate) fn share_all_version_certificates(&self) -> Result<(), AnnounceError> {
        let certificates = self.version_certificate_table.get_all()?;
        self.gossip_version_certificates(&certificates)
    }

    /// Drop announce state for addresses outside the validator connection
    /// set: both cooldown maps (once cold) and both tables.
    pub(crate) fn prune_announce_data_structures(&self) -> Result<(), AnnounceError> {
        let conn_set = self.directory.validator_conn_set()?;
        self.cooldowns.prune(&conn_set);
        self.val_enode_table.prune_entries(&conn_set)?;
        self.version_certificate_table.prune(&conn_set)?;
        Ok(())
    }
}
