//! Inbound handlers for the three announce message kinds, and the
//! [`AnnounceApi`] implementation.

use crate::domain::entries::AddressEntry;
use crate::domain::enode::EnodeUrl;
use crate::domain::enode_certificate::EnodeCertificate;
use crate::domain::gossip::{payload_hash, peer_payload_hash};
use crate::domain::message::{
    Message, ENODE_CERTIFICATE_MSG, QUERY_ENODE_MSG, VERSION_CERTIFICATES_MSG,
};
use crate::domain::query_enode::{validate_query_enode, QueryEnodeData};
use crate::domain::version_certificate::{decode_certificates, encode_certificates, VersionCertificate};
use crate::error::AnnounceError;
use crate::ports::inbound::AnnounceApi;
use crate::ports::outbound::{AnnouncePeer, PeerPurpose};
use crate::service::AnnounceService;
use crate::tables::{HighestKnownVersionUpdate, VersionAndEnodeUpdate};
use shared_types::{fmt_address, Address, NodeId, ValidatorConnSet, Version};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

impl AnnounceService {
    /// Record gossip provenance for a payload: the peer now knows it, and
    /// this node is about to process it. Returns true if this node already
    /// processed the payload and the handler should drop it.
    fn mark_gossiped_payload(&self, peer_address: &Address, payload: &[u8]) -> bool {
        self.peer_recent_messages
            .mark(peer_payload_hash(peer_address, payload));
        let key = payload_hash(payload);
        if self.self_recent_messages.contains(&key) {
            return true;
        }
        self.self_recent_messages.mark(key);
        false
    }

    fn handle_query_enode_inner(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError> {
        if self.mark_gossiped_payload(&peer_address, payload) {
            return Ok(());
        }

        let msg = Message::from_payload(payload)?;
        msg.verify()?;
        trace!(from = %fmt_address(&msg.address), "Handling a query-enode message");

        let conn_set = self.directory.validator_conn_set()?;
        if !conn_set.contains(&msg.address) {
            debug!(
                sender = %fmt_address(&msg.address),
                "Query-enode from a validator outside the connection set, ignoring"
            );
            return Err(AnnounceError::UnauthorizedMessage { sender: msg.address });
        }

        let data = QueryEnodeData::from_bytes(&msg.msg)?;
        validate_query_enode(&data, conn_set.len())?;

        if conn_set.contains(&self.identity.address()) {
            // Only the single entry addressed to this node matters; seen
            // payloads are cached, so answering needs no extra throttle.
            for encrypted in &data.encrypted_enode_urls {
                if encrypted.dest_address != self.identity.address() {
                    continue;
                }
                let enode_bytes = self.identity.decrypt(&encrypted.ciphertext)?;
                let enode_str = String::from_utf8(enode_bytes)
                    .map_err(|e| AnnounceError::InvalidEnode(e.to_string()))?;
                let node: EnodeUrl = enode_str.parse()?;
                self.answer_query_enode_msg(msg.address, node, data.version)?;
                break;
            }
        }

        if self.cooldowns.try_regossip_query_enode(msg.address) {
            trace!(source = %fmt_address(&msg.address), "Regossiping query-enode message");
            self.network.gossip(payload, QUERY_ENODE_MSG)?;
        } else {
            trace!(
                source = %fmt_address(&msg.address),
                "Already regossiped from this source within the cooldown, not regossiping"
            );
        }
        Ok(())
    }

    /// Answer a query-enode from `address`: send our enode certificate if
    /// the origin is already a peer, and upsert the origin regardless so
    /// it becomes a validator-purpose peer for the next handshake.
    fn answer_query_enode_msg(
        &self,
        address: Address,
        node: EnodeUrl,
        version: Version,
    ) -> Result<(), AnnounceError> {
        let node_id = node.node_id();
        let mut wanted = HashSet::new();
        wanted.insert(node_id);

        let matches = self.network.find_peers(Some(&wanted), PeerPurpose::Any);
        if let Some(peer) = matches.get(&node_id) {
            let certificate_map = self.enode_certificate_msg_map_inner();
            if let Some(msg) = certificate_map.get(&self.network.self_node().node_id()) {
                peer.send(ENODE_CERTIFICATE_MSG, &msg.payload())?;
            }
        }

        self.val_enode_table
            .upsert_version_and_enode(vec![VersionAndEnodeUpdate {
                address,
                node,
                version,
            }])
    }

    fn handle_version_certificates_inner(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError> {
        if self.mark_gossiped_payload(&peer_address, payload) {
            return Ok(());
        }

        let msg = Message::from_payload(payload)?;
        let certificates = decode_certificates(&msg.msg)?;
        let conn_set = self.directory.validator_conn_set()?;

        let mut valid = Vec::new();
        let mut seen_addresses: HashSet<Address> = HashSet::new();
        for mut certificate in certificates {
            // Address and public key are not on the wire; recover them,
            // skipping entries whose signature does not recover.
            if let Err(error) = certificate.recover() {
                warn!(%error, "Error recovering version certificate signer, skipping entry");
                continue;
            }
            if !conn_set.contains(&certificate.address) {
                debug!(
                    address = %fmt_address(&certificate.address),
                    "Version certificate from an address outside the connection set, skipping"
                );
                continue;
            }
            if !seen_addresses.insert(certificate.address) {
                debug!(
                    address = %fmt_address(&certificate.address),
                    "Duplicate version certificate in message, skipping"
                );
                continue;
            }
            valid.push(certificate);
        }

        self.upsert_and_gossip_version_certificate_entries(valid)
    }

    /// Absorb validated version certificates and regossip the novel ones.
    pub(crate) fn upsert_and_gossip_version_certificate_entries(
        &self,
        entries: Vec<VersionCertificate>,
    ) -> Result<(), AnnounceError> {
        let should_save = match self.should_save_and_publish() {
            Ok(should_save) => should_save,
            Err(error) => {
                warn!(%error, "Error checking if this node should save val enode URLs");
                false
            }
        };

        if should_save {
            let updates: Vec<HighestKnownVersionUpdate> = entries
                .iter()
                .filter(|entry| entry.address != self.identity.address())
                .map(|entry| HighestKnownVersionUpdate {
                    address: entry.address,
                    public_key: entry.public_key,
                    highest_known_version: entry.version,
                })
                .collect();
            if let Err(error) = self.val_enode_table.upsert_highest_known_version(updates) {
                warn!(%error, "Error upserting val enode table entries");
            }
        }

        let new_entries = match self.version_certificate_table.upsert(entries) {
            Ok(new_entries) => new_entries,
            Err(error) => {
                warn!(%error, "Error upserting version certificate table entries");
                Vec::new()
            }
        };

        // Per-source cooldown; our own certificates always pass.
        let to_regossip: Vec<VersionCertificate> = new_entries
            .into_iter()
            .filter(|entry| self.cooldowns.try_regossip_version_certificate(entry.address))
            .collect();

        if to_regossip.is_empty() {
            return Ok(());
        }
        self.gossip_version_certificates(&to_regossip)
    }

    fn handle_enode_certificate_inner(&self, payload: &[u8]) -> Result<(), AnnounceError> {
        let msg = Message::from_payload(payload)?;
        msg.verify()?;

        let certificate = EnodeCertificate::from_bytes(&msg.msg)?;
        let node: EnodeUrl = certificate.enode_url.parse()?;
        trace!(
            from = %fmt_address(&msg.address),
            version = certificate.version,
            "Received an enode certificate"
        );

        if !self.should_save_and_publish()? {
            debug!("This node should not save validator enode URLs, ignoring enode certificate");
            return Ok(());
        }

        let conn_set = self.directory.validator_conn_set()?;
        if !conn_set.contains(&msg.address) {
            debug!(
                sender = %fmt_address(&msg.address),
                "Enode certificate from a node outside the connection set"
            );
            return Err(AnnounceError::UnauthorizedMessage { sender: msg.address });
        }

        self.val_enode_table
            .upsert_version_and_enode(vec![VersionAndEnodeUpdate {
                address: msg.address,
                node,
                version: certificate.version,
            }])?;

        if let Some(proxy) = &self.proxy {
            proxy.share_val_enodes_with_proxies()?;
        }
        Ok(())
    }
}

impl AnnounceApi for AnnounceService {
    fn handle_query_enode(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError> {
        self.handle_query_enode_inner(peer_address, payload)
    }

    fn handle_version_certificates(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError> {
        self.handle_version_certificates_inner(peer_address, payload)
    }

    fn handle_enode_certificate(&self, payload: &[u8]) -> Result<(), AnnounceError> {
        self.handle_enode_certificate_inner(payload)
    }

    fn update_announce_version(&self) {
        self.request_version_update();
    }

    fn announce_version(&self) -> Version {
        self.announce_version_inner()
    }

    fn enode_certificate_msg_map(&self) -> HashMap<NodeId, Message> {
        self.enode_certificate_msg_map_inner()
    }

    fn set_enode_certificate_msg_map(
        &self,
        map: HashMap<NodeId, Message>,
    ) -> Result<(), AnnounceError> {
        self.set_enode_certificate_msg_map_inner(map)
    }

    fn enode_certificate_msg_version(&self) -> Version {
        self.enode_certificate_msg_version_inner()
    }

    fn send_version_certificate_table(
        &self,
        peer: &dyn AnnouncePeer,
    ) -> Result<(), AnnounceError> {
        let certificates = self.version_certificate_table.get_all()?;
        let msg = Message::unsigned(VERSION_CERTIFICATES_MSG, encode_certificates(&certificates));
        peer.send(VERSION_CERTIFICATES_MSG, &msg.payload())
    }

    fn generate_enode_certificate_msg(
        &self,
        enode_url: &EnodeUrl,
    ) -> Result<Message, AnnounceError> {
        self.generate_enode_certificate_msg_inner(enode_url)
    }

    fn val_enode_entries(
        &self,
        addresses: Option<&[Address]>,
    ) -> Result<HashMap<Address, AddressEntry>, AnnounceError> {
        self.val_enode_table.get_val_enodes(addresses)
    }

    fn rewrite_val_enode_entries(
        &self,
        entries: Vec<VersionAndEnodeUpdate>,
    ) -> Result<(), AnnounceError> {
        let keep: ValidatorConnSet = entries.iter().map(|entry| entry.address).collect();
        self.val_enode_table.prune_entries(&keep)?;
        self.val_enode_table.upsert_version_and_enode(entries)
    }
}
