use crate::domain::config::AnnounceConfig;
use crate::domain::enode::EnodeUrl;
use crate::domain::enode_certificate::EnodeCertificate;
use crate::domain::message::{
    Message, ENODE_CERTIFICATE_MSG, QUERY_ENODE_MSG, VERSION_CERTIFICATES_MSG,
};
use crate::domain::query_enode::{EncryptedEnodeUrl, QueryEnodeData};
use crate::domain::version_certificate::{
    decode_certificates, encode_certificates, VersionCertificate,
};
use crate::error::AnnounceError;
use crate::ports::inbound::AnnounceApi;
use crate::ports::outbound::{
    AnnouncePeer, GossipNetwork, InMemoryKVStore, NodeIdentity, PeerPurpose, ProxyEngine,
    ValidatorDirectory,
};
use crate::service::AnnounceService;
use crate::tables::HighestKnownVersionUpdate;
use parking_lot::Mutex;
use shared_crypto::{ecies_decrypt, ecies_encrypt, CryptoError, Keypair, PublicKeyBytes,
    RecoverableSignature};
use shared_types::{Address, NodeId, ValidatorConnSet, Version};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// Mock implementations of the outbound ports.

#[derive(Default)]
struct MockNetwork {
    self_node: Mutex<Option<EnodeUrl>>,
    gossiped: Mutex<Vec<(u8, Vec<u8>)>>,
    multicasts: Mutex<Vec<(Vec<Address>, u8, Vec<u8>)>>,
    peers: Mutex<HashMap<NodeId, Arc<MockPeer>>>,
}

impl MockNetwork {
    fn set_self_node(&self, node: EnodeUrl) {
        *self.self_node.lock() = Some(node);
    }

    fn add_peer(&self, node_id: NodeId) -> Arc<MockPeer> {
        let peer = Arc::new(MockPeer {
            node_id,
            sent: Mutex::new(Vec::new()),
        });
        self.peers.lock().insert(node_id, Arc::clone(&peer));
        peer
    }

    fn gossiped_with_code(&self, code: u8) -> Vec<Vec<u8>> {
        self.gossiped
            .lock()
            .iter()
            .filter(|(c, _)| *c == code)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl GossipNetwork for MockNetwork {
    fn gossip(&self, payload: &[u8], code: u8) -> Result<(), AnnounceError> {
        self.gossiped.lock().push((code, payload.to_vec()));
        Ok(())
    }

    fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: &[u8],
        code: u8,
        _send_to_self: bool,
    ) -> Result<(), AnnounceError> {
        self.multicasts
            .lock()
            .push((dest_addresses.to_vec(), code, payload.to_vec()));
        Ok(())
    }

    fn find_peers(
        &self,
        node_ids: Option<&HashSet<NodeId>>,
        _purpose: PeerPurpose,
    ) -> HashMap<NodeId, Arc<dyn AnnouncePeer>> {
        self.peers
            .lock()
            .iter()
            .filter(|(node_id, _)| node_ids.map_or(true, |wanted| wanted.contains(*node_id)))
            .map(|(node_id, peer)| (*node_id, Arc::clone(peer) as Arc<dyn AnnouncePeer>))
            .collect()
    }

    fn self_node(&self) -> EnodeUrl {
        self.self_node.lock().clone().expect("self node configured")
    }
}

struct MockPeer {
    node_id: NodeId,
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
}

impl AnnouncePeer for MockPeer {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn send(&self, code: u8, payload: &[u8]) -> Result<(), AnnounceError> {
        self.sent.lock().push((code, payload.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct MockDirectory {
    conn_set: Mutex<ValidatorConnSet>,
}

impl MockDirectory {
    fn set_members(&self, members: &[Address]) {
        *self.conn_set.lock() = members.iter().copied().collect();
    }
}

impl ValidatorDirectory for MockDirectory {
    fn validator_conn_set(&self) -> Result<ValidatorConnSet, AnnounceError> {
        Ok(self.conn_set.lock().clone())
    }
}

struct MockIdentity {
    keypair: Arc<Keypair>,
}

impl NodeIdentity for MockIdentity {
    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn validator_address(&self) -> Address {
        self.keypair.address()
    }

    fn public_key(&self) -> PublicKeyBytes {
        self.keypair.public_key()
    }

    fn sign(&self, prehash: &[u8; 32]) -> Result<RecoverableSignature, CryptoError> {
        self.keypair.sign_prehash_recoverable(prehash)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        ecies_decrypt(&self.keypair, ciphertext)
    }
}

#[derive(Default)]
struct MockProxyEngine {
    assignments: Mutex<HashMap<Address, EnodeUrl>>,
    external_nodes: Mutex<Vec<EnodeUrl>>,
    forwarded: Mutex<Vec<(Vec<Address>, u8, HashMap<NodeId, Vec<u8>>)>>,
    val_enode_shares: Mutex<u32>,
}

impl ProxyEngine for MockProxyEngine {
    fn validator_proxy_assignments(&self) -> Result<HashMap<Address, EnodeUrl>, AnnounceError> {
        Ok(self.assignments.lock().clone())
    }

    fn proxy_external_nodes(&self) -> Result<Vec<EnodeUrl>, AnnounceError> {
        Ok(self.external_nodes.lock().clone())
    }

    fn send_forward_msg(
        &self,
        dest_addresses: &[Address],
        code: u8,
        proxy_specific_payloads: HashMap<NodeId, Vec<u8>>,
    ) -> Result<(), AnnounceError> {
        self.forwarded
            .lock()
            .push((dest_addresses.to_vec(), code, proxy_specific_payloads));
        Ok(())
    }

    fn share_val_enodes_with_proxies(&self) -> Result<(), AnnounceError> {
        *self.val_enode_shares.lock() += 1;
        Ok(())
    }
}

// Test harness: one service with its mocks and keypair.

struct TestNode {
    keypair: Arc<Keypair>,
    network: Arc<MockNetwork>,
    directory: Arc<MockDirectory>,
    proxy: Option<Arc<MockProxyEngine>>,
    service: Arc<AnnounceService>,
}

impl TestNode {
    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn self_enode(&self) -> EnodeUrl {
        self.network.self_node()
    }
}

fn enode_for(keypair: &Keypair, last_octet: u8) -> EnodeUrl {
    EnodeUrl::new(keypair.public_key(), format!("10.0.0.{last_octet}"), 30303)
}

fn build_node(host_octet: u8, proxied: bool) -> TestNode {
    let keypair = Arc::new(Keypair::generate());
    let network = Arc::new(MockNetwork::default());
    network.set_self_node(enode_for(&keypair, host_octet));
    let directory = Arc::new(MockDirectory::default());
    let proxy = proxied.then(|| Arc::new(MockProxyEngine::default()));

    let service = Arc::new(AnnounceService::new(
        AnnounceConfig::for_testing(),
        Arc::clone(&network) as Arc<dyn GossipNetwork>,
        Arc::clone(&directory) as Arc<dyn ValidatorDirectory>,
        Arc::new(MockIdentity {
            keypair: Arc::clone(&keypair),
        }),
        proxy
            .as_ref()
            .map(|p| Arc::clone(p) as Arc<dyn ProxyEngine>),
        Box::new(InMemoryKVStore::new()),
        Box::new(InMemoryKVStore::new()),
    ));

    TestNode {
        keypair,
        network,
        directory,
        proxy,
        service,
    }
}

/// A signed query-enode payload from `sender`, carrying `url` encrypted to
/// each `(address, public_key)` destination.
fn query_enode_payload(
    sender: &Keypair,
    url: &EnodeUrl,
    version: Version,
    destinations: &[(Address, PublicKeyBytes)],
) -> Vec<u8> {
    let encrypted_enode_urls = destinations
        .iter()
        .map(|(address, public_key)| EncryptedEnodeUrl {
            dest_address: *address,
            ciphertext: ecies_encrypt(public_key, url.to_string().as_bytes()).unwrap(),
        })
        .collect();
    let data = QueryEnodeData {
        encrypted_enode_urls,
        version,
        timestamp: version,
    };
    let mut msg = Message::new(QUERY_ENODE_MSG, sender.address(), data.to_bytes());
    msg.sign_with(|hash| sender.sign_prehash_recoverable(hash))
        .unwrap();
    msg.payload()
}

fn version_certificates_payload(certificates: &[VersionCertificate]) -> Vec<u8> {
    Message::unsigned(VERSION_CERTIFICATES_MSG, encode_certificates(certificates)).payload()
}

fn enode_certificate_payload(sender: &Keypair, url: &EnodeUrl, version: Version) -> Vec<u8> {
    let certificate = EnodeCertificate {
        enode_url: url.to_string(),
        version,
    };
    let mut msg = Message::new(ENODE_CERTIFICATE_MSG, sender.address(), certificate.to_bytes());
    msg.sign_with(|hash| sender.sign_prehash_recoverable(hash))
        .unwrap();
    msg.payload()
}

mod query_enode_handling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn answers_query_addressed_to_self() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        let origin_url = enode_for(&origin, 2);
        node.directory
            .set_members(&[node.address(), origin.address()]);

        let payload = query_enode_payload(
            &origin,
            &origin_url,
            100,
            &[(node.address(), node.keypair.public_key())],
        );
        node.service
            .handle_query_enode(origin.address(), &payload)
            .unwrap();

        // The origin is upserted so it becomes a validator-purpose peer.
        let entries = node.service.val_enode_entries(None).unwrap();
        let entry = &entries[&origin.address()];
        assert_eq!(entry.node, Some(origin_url));
        assert_eq!(entry.version, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_certificate_when_origin_is_already_peered() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        let origin_url = enode_for(&origin, 2);
        node.directory
            .set_members(&[node.address(), origin.address()]);

        // Install our enode certificate map and peer with the origin.
        let certs = node.service.generate_enode_certificate_msgs(50).unwrap();
        node.service.set_enode_certificate_msg_map(certs).unwrap();
        let peer = node.network.add_peer(origin_url.node_id());

        let payload = query_enode_payload(
            &origin,
            &origin_url,
            100,
            &[(node.address(), node.keypair.public_key())],
        );
        node.service
            .handle_query_enode(origin.address(), &payload)
            .unwrap();

        let sent = peer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ENODE_CERTIFICATE_MSG);
        let cert_msg = Message::from_payload(&sent[0].1).unwrap();
        assert_eq!(cert_msg.verify().unwrap(), node.address());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_sender_outside_conn_set() {
        let node = build_node(1, false);
        let outsider = Keypair::generate();
        node.directory.set_members(&[node.address()]);

        let payload = query_enode_payload(
            &outsider,
            &enode_for(&outsider, 2),
            100,
            &[(node.address(), node.keypair.public_key())],
        );
        let result = node.service.handle_query_enode(outsider.address(), &payload);

        assert!(matches!(
            result,
            Err(AnnounceError::UnauthorizedMessage { sender }) if sender == outsider.address()
        ));
        assert!(node.network.gossiped_with_code(QUERY_ENODE_MSG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_duplicate_destinations_without_regossip() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        node.directory
            .set_members(&[node.address(), origin.address()]);

        let dest = (node.address(), node.keypair.public_key());
        let payload = query_enode_payload(&origin, &enode_for(&origin, 2), 100, &[dest, dest]);
        let result = node.service.handle_query_enode(origin.address(), &payload);

        assert!(matches!(
            result,
            Err(AnnounceError::DuplicateEntries { .. })
        ));
        assert!(node.network.gossiped_with_code(QUERY_ENODE_MSG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_oversized_message_without_regossip() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        node.directory
            .set_members(&[node.address(), origin.address()]);

        // Five entries against a two-member set exceeds the 2x bound.
        let destinations: Vec<(Address, PublicKeyBytes)> = (0..5u8)
            .map(|i| ([i; 20], Keypair::generate().public_key()))
            .collect();
        let payload =
            query_enode_payload(&origin, &enode_for(&origin, 2), 100, &destinations);
        let result = node.service.handle_query_enode(origin.address(), &payload);

        assert!(matches!(result, Err(AnnounceError::TooManyEntries { .. })));
        assert!(node.network.gossiped_with_code(QUERY_ENODE_MSG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drops_payload_already_processed_by_self() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        node.directory
            .set_members(&[node.address(), origin.address()]);

        let payload = query_enode_payload(
            &origin,
            &enode_for(&origin, 2),
            100,
            &[(node.address(), node.keypair.public_key())],
        );
        node.service
            .handle_query_enode(origin.address(), &payload)
            .unwrap();
        let gossips_after_first = node.network.gossiped_with_code(QUERY_ENODE_MSG).len();

        // The identical payload arrives via another peer: dropped.
        node.service
            .handle_query_enode([9u8; 20], &payload)
            .unwrap();
        assert_eq!(
            node.network.gossiped_with_code(QUERY_ENODE_MSG).len(),
            gossips_after_first
        );
    }

    #[tokio::test(start_paused = true)]
    async fn regossip_throttled_within_cooldown_then_allowed() {
        let node = build_node(1, false);
        let origin = Keypair::generate();
        let origin_url = enode_for(&origin, 2);
        node.directory
            .set_members(&[node.address(), origin.address()]);
        let dest = [(node.address(), node.keypair.public_key())];

        let first = query_enode_payload(&origin, &origin_url, 100, &dest);
        node.service
            .handle_query_enode(origin.address(), &first)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);

        // A fresh message from the same origin four minutes later is
        // processed locally but not regossiped.
        tokio::time::advance(std::time::Duration::from_secs(4 * 60)).await;
        let second = query_enode_payload(&origin, &origin_url, 101, &dest);
        node.service
            .handle_query_enode(origin.address(), &second)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);
        let entries = node.service.val_enode_entries(None).unwrap();
        assert_eq!(entries[&origin.address()].version, 101);

        // Two more minutes and the cooldown has elapsed.
        tokio::time::advance(std::time::Duration::from_secs(2 * 60)).await;
        let third = query_enode_payload(&origin, &origin_url, 102, &dest);
        node.service
            .handle_query_enode(origin.address(), &third)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 2);
    }
}

mod version_certificate_handling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn regossips_only_novel_entries() {
        let node = build_node(1, false);
        let v2 = Keypair::generate();
        let v3 = Keypair::generate();
        node.directory
            .set_members(&[node.address(), v2.address(), v3.address()]);

        // Seed V2@100 via a first message.
        let v2_cert = VersionCertificate::create_with_keypair(100, &v2).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[v2_cert.clone()]))
            .unwrap();
        assert_eq!(
            node.network
                .gossiped_with_code(VERSION_CERTIFICATES_MSG)
                .len(),
            1
        );

        // V2@100 again plus a novel V3@200: only V3 is regossiped.
        let v3_cert = VersionCertificate::create_with_keypair(200, &v3).unwrap();
        node.service
            .handle_version_certificates(
                [8u8; 20],
                &version_certificates_payload(&[v2_cert, v3_cert]),
            )
            .unwrap();

        let gossips = node.network.gossiped_with_code(VERSION_CERTIFICATES_MSG);
        assert_eq!(gossips.len(), 2);
        let msg = Message::from_payload(&gossips[1]).unwrap();
        let mut regossiped = decode_certificates(&msg.msg).unwrap();
        assert_eq!(regossiped.len(), 1);
        regossiped[0].recover().unwrap();
        assert_eq!(regossiped[0].address, v3.address());
        assert_eq!(regossiped[0].version, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_highest_known_version_for_peers() {
        let node = build_node(1, false);
        let v2 = Keypair::generate();
        node.directory.set_members(&[node.address(), v2.address()]);

        let cert = VersionCertificate::create_with_keypair(300, &v2).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[cert]))
            .unwrap();

        let entries = node.service.val_enode_entries(None).unwrap();
        let entry = &entries[&v2.address()];
        assert_eq!(entry.highest_known_version, 300);
        assert_eq!(entry.public_key, Some(v2.public_key()));
        assert_eq!(entry.version, 0);
        assert!(entry.node.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn skips_entries_outside_conn_set_and_duplicates() {
        let node = build_node(1, false);
        let member = Keypair::generate();
        let outsider = Keypair::generate();
        node.directory
            .set_members(&[node.address(), member.address()]);

        let member_cert = VersionCertificate::create_with_keypair(100, &member).unwrap();
        let member_cert_newer = VersionCertificate::create_with_keypair(150, &member).unwrap();
        let outsider_cert = VersionCertificate::create_with_keypair(100, &outsider).unwrap();

        // Duplicate address within one message: first occurrence wins.
        node.service
            .handle_version_certificates(
                [8u8; 20],
                &version_certificates_payload(&[member_cert, member_cert_newer, outsider_cert]),
            )
            .unwrap();

        let entries = node.service.val_enode_entries(None).unwrap();
        assert_eq!(entries[&member.address()].highest_known_version, 100);
        assert!(!entries.contains_key(&outsider.address()));
    }

    #[tokio::test(start_paused = true)]
    async fn self_originated_certificate_bypasses_cooldown() {
        let node = build_node(1, false);
        node.directory.set_members(&[node.address()]);

        // Share our own certificate once; the cooldown stamp is fresh.
        let own = VersionCertificate::create_with_keypair(100, &node.keypair).unwrap();
        node.service
            .upsert_and_gossip_version_certificate_entries(vec![own])
            .unwrap();
        assert_eq!(
            node.network
                .gossiped_with_code(VERSION_CERTIFICATES_MSG)
                .len(),
            1
        );

        // Our own newer certificate reflected back within the cooldown is
        // still regossiped.
        let newer = VersionCertificate::create_with_keypair(200, &node.keypair).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[newer]))
            .unwrap();
        assert_eq!(
            node.network
                .gossiped_with_code(VERSION_CERTIFICATES_MSG)
                .len(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn own_address_is_not_written_to_val_enode_table() {
        let node = build_node(1, false);
        node.directory.set_members(&[node.address()]);

        let own = VersionCertificate::create_with_keypair(100, &node.keypair).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[own]))
            .unwrap();

        let entries = node.service.val_enode_entries(None).unwrap();
        assert!(!entries.contains_key(&node.address()));
    }
}

mod enode_certificate_handling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn upserts_sender_endpoint() {
        let node = build_node(1, false);
        let sender = Keypair::generate();
        let sender_url = enode_for(&sender, 2);
        node.directory
            .set_members(&[node.address(), sender.address()]);

        node.service
            .handle_enode_certificate(&enode_certificate_payload(&sender, &sender_url, 400))
            .unwrap();

        let entries = node.service.val_enode_entries(None).unwrap();
        let entry = &entries[&sender.address()];
        assert_eq!(entry.node, Some(sender_url));
        assert_eq!(entry.version, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_sender_outside_conn_set() {
        let node = build_node(1, false);
        let outsider = Keypair::generate();
        node.directory.set_members(&[node.address()]);

        let result = node.service.handle_enode_certificate(&enode_certificate_payload(
            &outsider,
            &enode_for(&outsider, 2),
            400,
        ));
        assert!(matches!(
            result,
            Err(AnnounceError::UnauthorizedMessage { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_when_not_in_conn_set_ourselves() {
        let node = build_node(1, false);
        let sender = Keypair::generate();
        node.directory.set_members(&[sender.address()]);

        node.service
            .handle_enode_certificate(&enode_certificate_payload(
                &sender,
                &enode_for(&sender, 2),
                400,
            ))
            .unwrap();

        assert!(node.service.val_enode_entries(None).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn proxied_validator_shares_val_enodes_with_proxies() {
        let node = build_node(1, true);
        let sender = Keypair::generate();
        node.directory
            .set_members(&[node.address(), sender.address()]);

        node.service
            .handle_enode_certificate(&enode_certificate_payload(
                &sender,
                &enode_for(&sender, 2),
                400,
            ))
            .unwrap();

        assert_eq!(*node.proxy.as_ref().unwrap().val_enode_shares.lock(), 1);
    }
}

mod enode_certificate_map {
    use super::*;

    fn signed_cert_msg(node: &TestNode, url: &EnodeUrl, version: Version) -> Message {
        let certificate = EnodeCertificate {
            enode_url: url.to_string(),
            version,
        };
        let mut msg = Message::new(
            ENODE_CERTIFICATE_MSG,
            node.address(),
            certificate.to_bytes(),
        );
        msg.sign_with(|hash| node.keypair.sign_prehash_recoverable(hash))
            .unwrap();
        msg
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_mixed_versions() {
        let node = build_node(1, false);
        let url = node.self_enode();
        let other = enode_for(&Keypair::generate(), 2);

        let mut map = HashMap::new();
        map.insert(url.node_id(), signed_cert_msg(&node, &url, 100));
        map.insert(other.node_id(), signed_cert_msg(&node, &other, 101));

        assert!(matches!(
            node.service.set_enode_certificate_msg_map(map),
            Err(AnnounceError::InvalidCertificateMap)
        ));
        assert_eq!(node.service.enode_certificate_msg_version(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_empty_map() {
        let node = build_node(1, false);
        assert!(matches!(
            node.service.set_enode_certificate_msg_map(HashMap::new()),
            Err(AnnounceError::InvalidCertificateMap)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn older_or_equal_version_is_a_no_op() {
        let node = build_node(1, false);
        let url = node.self_enode();

        let mut fresh = HashMap::new();
        fresh.insert(url.node_id(), signed_cert_msg(&node, &url, 100));
        node.service.set_enode_certificate_msg_map(fresh).unwrap();
        assert_eq!(node.service.enode_certificate_msg_version(), 100);

        let mut stale = HashMap::new();
        stale.insert(url.node_id(), signed_cert_msg(&node, &url, 90));
        node.service.set_enode_certificate_msg_map(stale).unwrap();
        assert_eq!(node.service.enode_certificate_msg_version(), 100);

        let map = node.service.enode_certificate_msg_map();
        let cert = EnodeCertificate::from_bytes(&map[&url.node_id()].msg).unwrap();
        assert_eq!(cert.version, 100);
    }
}

mod version_publication {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn standalone_share_multicasts_cert_and_gossips_version() {
        let node = build_node(1, false);
        let other = Keypair::generate();
        node.directory.set_members(&[node.address(), other.address()]);

        node.service
            .set_and_share_updated_announce_version(1_000)
            .unwrap();

        // The signed enode certificate went to the connection set.
        let multicasts = node.network.multicasts.lock();
        assert_eq!(multicasts.len(), 1);
        let (dests, code, payload) = &multicasts[0];
        assert_eq!(*code, ENODE_CERTIFICATE_MSG);
        assert!(dests.contains(&other.address()));
        let msg = Message::from_payload(payload).unwrap();
        assert_eq!(msg.verify().unwrap(), node.address());
        let cert = EnodeCertificate::from_bytes(&msg.msg).unwrap();
        assert_eq!(cert.version, 1_000);
        assert_eq!(cert.enode_url, node.self_enode().to_string());
        drop(multicasts);

        // A fresh self version certificate was stored and gossiped.
        assert_eq!(node.service.enode_certificate_msg_version(), 1_000);
        let gossips = node.network.gossiped_with_code(VERSION_CERTIFICATES_MSG);
        assert_eq!(gossips.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_op_when_not_in_conn_set() {
        let node = build_node(1, false);
        node.directory.set_members(&[Keypair::generate().address()]);

        node.service
            .set_and_share_updated_announce_version(1_000)
            .unwrap();

        assert!(node.network.multicasts.lock().is_empty());
        assert!(node
            .network
            .gossiped_with_code(VERSION_CERTIFICATES_MSG)
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn proxied_share_forwards_one_cert_per_proxy() {
        let node = build_node(1, true);
        let other = Keypair::generate();
        node.directory.set_members(&[node.address(), other.address()]);

        let proxy_a = enode_for(&Keypair::generate(), 10);
        let proxy_b = enode_for(&Keypair::generate(), 11);
        *node.proxy.as_ref().unwrap().external_nodes.lock() =
            vec![proxy_a.clone(), proxy_b.clone()];

        node.service
            .set_and_share_updated_announce_version(2_000)
            .unwrap();

        let forwarded = node.proxy.as_ref().unwrap().forwarded.lock();
        assert_eq!(forwarded.len(), 1);
        let (dests, code, payloads) = &forwarded[0];
        assert_eq!(*code, ENODE_CERTIFICATE_MSG);
        assert!(dests.contains(&other.address()));
        assert_eq!(payloads.len(), 2);

        for proxy_url in [&proxy_a, &proxy_b] {
            let payload = &payloads[&proxy_url.node_id()];
            let msg = Message::from_payload(payload).unwrap();
            let cert = EnodeCertificate::from_bytes(&msg.msg).unwrap();
            assert_eq!(cert.version, 2_000);
            assert_eq!(cert.enode_url, proxy_url.to_string());
        }

        assert_eq!(node.service.enode_certificate_msg_version(), 2_000);
        assert!(node.network.multicasts.lock().is_empty());
    }
}

mod query_enode_publication {
    use super::*;

    fn seed_stale_peer(node: &TestNode, peer: &Keypair, version: Version) {
        node.service
            .val_enode_table
            .upsert_highest_known_version(vec![HighestKnownVersionUpdate {
                address: peer.address(),
                public_key: peer.public_key(),
                highest_known_version: version,
            }])
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn encrypts_one_entry_per_stale_destination() {
        let node = build_node(1, false);
        let v2 = Keypair::generate();
        let v3 = Keypair::generate();
        node.directory
            .set_members(&[node.address(), v2.address(), v3.address()]);
        seed_stale_peer(&node, &v2, 100);
        seed_stale_peer(&node, &v3, 100);

        node.service
            .generate_and_gossip_query_enode(500, false)
            .unwrap();

        let gossips = node.network.gossiped_with_code(QUERY_ENODE_MSG);
        assert_eq!(gossips.len(), 1);
        let msg = Message::from_payload(&gossips[0]).unwrap();
        assert_eq!(msg.verify().unwrap(), node.address());
        let data = QueryEnodeData::from_bytes(&msg.msg).unwrap();
        assert_eq!(data.version, 500);
        assert_eq!(data.encrypted_enode_urls.len(), 2);

        // Each destination can decrypt its entry back to our URL; the
        // plaintext URL never appears in the wire payload.
        let url = node.self_enode().to_string();
        for keypair in [&v2, &v3] {
            let entry = data
                .encrypted_enode_urls
                .iter()
                .find(|e| e.dest_address == keypair.address())
                .unwrap();
            let plaintext = ecies_decrypt(keypair, &entry.ciphertext).unwrap();
            assert_eq!(plaintext, url.as_bytes());
        }
        assert!(!gossips[0]
            .windows(url.len())
            .any(|window| window == url.as_bytes()));

        // Query stats were recorded for both destinations.
        let entries = node.service.val_enode_entries(None).unwrap();
        assert_eq!(entries[&v2.address()].num_query_attempts_for_hk_version, 1);
        assert_eq!(entries[&v3.address()].num_query_attempts_for_hk_version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_up_to_date_entries() {
        let node = build_node(1, false);
        let stale = Keypair::generate();
        let current = Keypair::generate();
        node.directory.set_members(&[
            node.address(),
            stale.address(),
            current.address(),
        ]);
        seed_stale_peer(&node, &stale, 100);

        // `current` already has a node at its highest known version.
        seed_stale_peer(&node, &current, 100);
        node.service
            .val_enode_table
            .upsert_version_and_enode(vec![crate::tables::VersionAndEnodeUpdate {
                address: current.address(),
                node: enode_for(&current, 3),
                version: 100,
            }])
            .unwrap();

        node.service
            .generate_and_gossip_query_enode(500, false)
            .unwrap();

        let gossips = node.network.gossiped_with_code(QUERY_ENODE_MSG);
        let data =
            QueryEnodeData::from_bytes(&Message::from_payload(&gossips[0]).unwrap().msg).unwrap();
        assert_eq!(data.encrypted_enode_urls.len(), 1);
        assert_eq!(data.encrypted_enode_urls[0].dest_address, stale.address());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_nothing_when_no_candidates() {
        let node = build_node(1, false);
        node.directory.set_members(&[node.address()]);

        node.service
            .generate_and_gossip_query_enode(500, true)
            .unwrap();

        assert!(node.network.gossiped_with_code(QUERY_ENODE_MSG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_skips_recently_queried_entries() {
        let node = build_node(1, false);
        let peer = Keypair::generate();
        node.directory.set_members(&[node.address(), peer.address()]);
        seed_stale_peer(&node, &peer, 100);

        // First enforced publication queries the peer and stamps stats.
        node.service
            .generate_and_gossip_query_enode(500, true)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);

        // Within the 5-minute backoff window nothing is emitted.
        node.service
            .generate_and_gossip_query_enode(501, true)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);

        // Without enforcement the entry is queried again.
        node.service
            .generate_and_gossip_query_enode(502, false)
            .unwrap();
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn proxied_validator_advertises_assigned_proxy_urls() {
        let node = build_node(1, true);
        let v2 = Keypair::generate();
        let unassigned = Keypair::generate();
        node.directory.set_members(&[
            node.address(),
            v2.address(),
            unassigned.address(),
        ]);
        seed_stale_peer(&node, &v2, 100);
        seed_stale_peer(&node, &unassigned, 100);

        let proxy_url = enode_for(&Keypair::generate(), 10);
        node.proxy
            .as_ref()
            .unwrap()
            .assignments
            .lock()
            .insert(v2.address(), proxy_url.clone());

        node.service
            .generate_and_gossip_query_enode(500, false)
            .unwrap();

        let gossips = node.network.gossiped_with_code(QUERY_ENODE_MSG);
        let data =
            QueryEnodeData::from_bytes(&Message::from_payload(&gossips[0]).unwrap().msg).unwrap();
        // Only the assigned destination is present, carrying the proxy URL.
        assert_eq!(data.encrypted_enode_urls.len(), 1);
        assert_eq!(data.encrypted_enode_urls[0].dest_address, v2.address());
        let plaintext = ecies_decrypt(&v2, &data.encrypted_enode_urls[0].ciphertext).unwrap();
        assert_eq!(plaintext, proxy_url.to_string().as_bytes());
    }
}

mod rewrite_and_reads {
    use super::*;
    use crate::tables::VersionAndEnodeUpdate;

    #[tokio::test(start_paused = true)]
    async fn rewrite_prunes_then_upserts() {
        let node = build_node(1, false);
        let keep = Keypair::generate();
        let drop_me = Keypair::generate();

        node.service
            .val_enode_table
            .upsert_version_and_enode(vec![
                VersionAndEnodeUpdate {
                    address: keep.address(),
                    node: enode_for(&keep, 2),
                    version: 10,
                },
                VersionAndEnodeUpdate {
                    address: drop_me.address(),
                    node: enode_for(&drop_me, 3),
                    version: 10,
                },
            ])
            .unwrap();

        node.service
            .rewrite_val_enode_entries(vec![VersionAndEnodeUpdate {
                address: keep.address(),
                node: enode_for(&keep, 2),
                version: 20,
            }])
            .unwrap();

        let entries = node.service.val_enode_entries(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&keep.address()].version, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn send_version_certificate_table_pushes_all_to_peer() {
        let node = build_node(1, false);
        let v2 = Keypair::generate();
        node.directory.set_members(&[node.address(), v2.address()]);

        let cert = VersionCertificate::create_with_keypair(100, &v2).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[cert]))
            .unwrap();

        let peer = node.network.add_peer([0x77; 32]);
        node.service
            .send_version_certificate_table(peer.as_ref())
            .unwrap();

        let sent = peer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, VERSION_CERTIFICATES_MSG);
        let msg = Message::from_payload(&sent[0].1).unwrap();
        assert_eq!(decode_certificates(&msg.msg).unwrap().len(), 1);
    }
}

mod control_loop {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn settle() {
        // Let spawned tasks and select branches run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Spawn the control loop; the service keeps running until the
    /// returned sender is dropped or fired.
    fn spawn_loop(service: Arc<AnnounceService>) -> oneshot::Sender<()> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            service.run(shutdown_rx).await;
        });
        shutdown_tx
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_first_query_after_enable_delay() {
        let node = build_node(1, false);
        let peer = Keypair::generate();
        node.directory.set_members(&[node.address(), peer.address()]);
        // Give the loop something to query for.
        node.service
            .val_enode_table
            .upsert_highest_known_version(vec![HighestKnownVersionUpdate {
                address: peer.address(),
                public_key: peer.public_key(),
                highest_known_version: 100,
            }])
            .unwrap();

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;

        // First should-announce check fires at 5 s; with epoch ≤ 10 the
        // first publication lands 5 s after that.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(node.network.gossiped_with_code(QUERY_ENODE_MSG).is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);

        // The enable transition also shared a version certificate.
        assert!(!node
            .network
            .gossiped_with_code(VERSION_CERTIFICATES_MSG)
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_publishing_after_leaving_conn_set() {
        let node = build_node(1, false);
        let peer = Keypair::generate();
        node.directory.set_members(&[node.address(), peer.address()]);
        node.service
            .val_enode_table
            .upsert_highest_known_version(vec![HighestKnownVersionUpdate {
                address: peer.address(),
                public_key: peer.public_key(),
                highest_known_version: 100,
            }])
            .unwrap();

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;

        tokio::time::advance(Duration::from_secs(12)).await;
        settle().await;
        let published = node.network.gossiped_with_code(QUERY_ENODE_MSG).len();
        assert!(published >= 1);

        // Leave the set: the next check disables the tickers.
        node.directory.set_members(&[peer.address()]);
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;

        let at_disable = node.network.gossiped_with_code(QUERY_ENODE_MSG).len();
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        settle().await;
        assert_eq!(
            node.network.gossiped_with_code(QUERY_ENODE_MSG).len(),
            at_disable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn external_version_update_requests_coalesce() {
        let node = build_node(1, false);
        node.directory.set_members(&[node.address()]);

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        let initial_version = node.service.announce_version();
        assert!(initial_version > 0);

        // Multiple pending requests produce a single bump pass.
        node.service.update_announce_version();
        node.service.update_announce_version();
        node.service.update_announce_version();
        settle().await;

        // Version only moves when the wall clock does; the coalesced run
        // must not have regressed it.
        assert!(node.service.announce_version() >= initial_version);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_tick_drops_departed_validators() {
        let node = build_node(1, false);
        let departing = Keypair::generate();
        node.directory
            .set_members(&[node.address(), departing.address()]);
        node.service
            .val_enode_table
            .upsert_highest_known_version(vec![HighestKnownVersionUpdate {
                address: departing.address(),
                public_key: departing.public_key(),
                highest_known_version: 100,
            }])
            .unwrap();

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;

        // Departure happens before the prune tick.
        node.directory.set_members(&[node.address()]);
        tokio::time::advance(Duration::from_secs(10 * 60 + 5)).await;
        settle().await;

        assert!(node.service.val_enode_entries(None).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn share_tick_gossips_certificate_table() {
        let node = build_node(1, false);
        let v2 = Keypair::generate();
        node.directory.set_members(&[v2.address()]);

        let cert = VersionCertificate::create_with_keypair(100, &v2).unwrap();
        node.service
            .handle_version_certificates([8u8; 20], &version_certificates_payload(&[cert]))
            .unwrap();
        let before = node
            .network
            .gossiped_with_code(VERSION_CERTIFICATES_MSG)
            .len();

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;
        tokio::time::advance(Duration::from_secs(5 * 60 + 5)).await;
        settle().await;

        let after = node
            .network
            .gossiped_with_code(VERSION_CERTIFICATES_MSG)
            .len();
        assert!(after > before);
        // The shared snapshot carries the full table.
        let gossips = node.network.gossiped_with_code(VERSION_CERTIFICATES_MSG);
        let msg = Message::from_payload(gossips.last().unwrap()).unwrap();
        assert_eq!(decode_certificates(&msg.msg).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn high_frequency_cadence_drops_after_threshold_emissions() {
        let node = build_node(1, false);
        let candidate = Keypair::generate();
        node.directory
            .set_members(&[node.address(), candidate.address()]);
        // A connected peer flips the state machine out of
        // before-first-peer immediately.
        node.network.add_peer([0x55; 32]);

        let mut next_version: Version = 100;
        let mut bump = |node: &TestNode| {
            next_version += 1;
            node.service
                .val_enode_table
                .upsert_highest_known_version(vec![HighestKnownVersionUpdate {
                    address: candidate.address(),
                    public_key: candidate.public_key(),
                    highest_known_version: next_version,
                }])
                .unwrap();
        };
        bump(&node);

        let _shutdown = spawn_loop(Arc::clone(&node.service));
        settle().await;

        // Enable at 5 s, first publication 5 s later.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 1);

        // Twelve one-minute ticks: ten bounded high-frequency emissions
        // plus the transition publications, all still on the 60 s cadence.
        // Advancing the highest known version keeps the candidate stale so
        // every publication actually emits.
        for _ in 0..12 {
            tokio::time::advance(Duration::from_secs(60)).await;
            settle().await;
            bump(&node);
        }
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 13);

        // After the threshold the ticker is rebuilt to the low-frequency
        // period: four more minutes bring nothing.
        tokio::time::advance(Duration::from_secs(240)).await;
        settle().await;
        bump(&node);
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 13);

        // The next emission lands a full low-frequency period after the
        // last high-frequency one.
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(node.network.gossiped_with_code(QUERY_ENODE_MSG).len(), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_loop() {
        let node = build_node(1, false);
        node.directory.set_members(&[node.address()]);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let service = Arc::clone(&node.service);
        let handle = tokio::spawn(async move {
            service.run(shutdown_rx).await;
        });
        settle().await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
