//! Simulated cluster: in-process announce services wired through a hub
//! network that routes gossip, multicast and direct peer sends.

use parking_lot::{Mutex, RwLock};
use shared_crypto::{ecies_decrypt, CryptoError, Keypair, PublicKeyBytes, RecoverableSignature};
use shared_types::{Address, NodeId, ValidatorConnSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use validator_announce::domain::enode::EnodeUrl;
use validator_announce::domain::message::{
    ENODE_CERTIFICATE_MSG, QUERY_ENODE_MSG, VERSION_CERTIFICATES_MSG,
};
use validator_announce::error::AnnounceError;
use validator_announce::ports::inbound::AnnounceApi;
use validator_announce::ports::outbound::{
    AnnouncePeer, GossipNetwork, InMemoryKVStore, NodeIdentity, PeerPurpose, ValidatorDirectory,
};
use validator_announce::{AnnounceConfig, AnnounceService};

/// One recorded emission onto the hub (gossip only, not per-target fanout).
#[derive(Clone)]
pub struct Emission {
    /// Validator address of the emitting node.
    pub from: Address,
    /// Wire message code.
    pub code: u8,
    /// Envelope payload.
    pub payload: Vec<u8>,
}

struct HubNode {
    address: Address,
    node_id: NodeId,
    service: Arc<AnnounceService>,
}

/// The simulated network fabric. Gossip reaches each node's configured
/// neighbors (everyone, in a full mesh); deliveries run synchronously on
/// the caller's task, so a regossip chain completes before the original
/// send returns.
#[derive(Default)]
pub struct Hub {
    nodes: RwLock<Vec<HubNode>>,
    /// Gossip adjacency; when empty the topology is a full mesh.
    neighbors: RwLock<HashMap<Address, HashSet<Address>>>,
    /// Direct peer adjacency for `find_peers`.
    peered: RwLock<HashSet<(Address, Address)>>,
    emissions: Mutex<Vec<Emission>>,
}

impl Hub {
    fn register(&self, address: Address, node_id: NodeId, service: Arc<AnnounceService>) {
        self.nodes.write().push(HubNode {
            address,
            node_id,
            service,
        });
    }

    /// Restrict gossip from `a` to `b` (and back) instead of the full mesh.
    pub fn connect_gossip(&self, a: Address, b: Address) {
        let mut neighbors = self.neighbors.write();
        neighbors.entry(a).or_default().insert(b);
        neighbors.entry(b).or_default().insert(a);
    }

    /// Mark two nodes as directly peered for `find_peers`.
    pub fn peer(&self, a: Address, b: Address) {
        let mut peered = self.peered.write();
        peered.insert((a, b));
        peered.insert((b, a));
    }

    /// All recorded emissions with the given code.
    pub fn emissions_with_code(&self, code: u8) -> Vec<Emission> {
        self.emissions
            .lock()
            .iter()
            .filter(|emission| emission.code == code)
            .cloned()
            .collect()
    }

    fn gossip_targets(&self, from: Address) -> Vec<(Address, Arc<AnnounceService>)> {
        let neighbors = self.neighbors.read();
        let restricted = neighbors.get(&from).cloned();
        drop(neighbors);

        self.nodes
            .read()
            .iter()
            .filter(|node| node.address != from)
            .filter(|node| match &restricted {
                Some(allowed) => allowed.contains(&node.address),
                None => true,
            })
            .map(|node| (node.address, Arc::clone(&node.service)))
            .collect()
    }

    fn gossip(&self, from: Address, payload: &[u8], code: u8) {
        self.emissions.lock().push(Emission {
            from,
            code,
            payload: payload.to_vec(),
        });
        for (_, service) in self.gossip_targets(from) {
            dispatch(&service, from, code, payload);
        }
    }

    fn multicast(&self, from: Address, dests: &[Address], payload: &[u8], code: u8) {
        let targets: Vec<Arc<AnnounceService>> = self
            .nodes
            .read()
            .iter()
            .filter(|node| node.address != from && dests.contains(&node.address))
            .map(|node| Arc::clone(&node.service))
            .collect();
        for service in targets {
            dispatch(&service, from, code, payload);
        }
    }

    fn peers_of(
        &self,
        owner: Address,
        filter: Option<&HashSet<NodeId>>,
    ) -> HashMap<NodeId, Arc<dyn AnnouncePeer>> {
        let peered = self.peered.read().clone();
        self.nodes
            .read()
            .iter()
            .filter(|node| peered.contains(&(owner, node.address)))
            .filter(|node| filter.map_or(true, |wanted| wanted.contains(&node.node_id)))
            .map(|node| {
                let peer: Arc<dyn AnnouncePeer> = Arc::new(HubPeer {
                    owner,
                    target_node_id: node.node_id,
                    target: Arc::clone(&node.service),
                });
                (node.node_id, peer)
            })
            .collect()
    }
}

/// Route a payload into the right handler by message code, swallowing
/// handler errors the way a transport would (log and penalize, not crash).
fn dispatch(service: &AnnounceService, from: Address, code: u8, payload: &[u8]) {
    let result = match code {
        QUERY_ENODE_MSG => service.handle_query_enode(from, payload),
        VERSION_CERTIFICATES_MSG => service.handle_version_certificates(from, payload),
        ENODE_CERTIFICATE_MSG => service.handle_enode_certificate(payload),
        other => {
            tracing::warn!(code = other, "Unroutable message code in hub");
            Ok(())
        }
    };
    if let Err(error) = result {
        tracing::debug!(%error, code, "Handler rejected delivery");
    }
}

struct HubPeer {
    owner: Address,
    target_node_id: NodeId,
    target: Arc<AnnounceService>,
}

impl AnnouncePeer for HubPeer {
    fn node_id(&self) -> NodeId {
        self.target_node_id
    }

    fn send(&self, code: u8, payload: &[u8]) -> Result<(), AnnounceError> {
        dispatch(&self.target, self.owner, code, payload);
        Ok(())
    }
}

/// Per-node facade onto the hub implementing the transport port.
struct HubNetwork {
    hub: Arc<Hub>,
    own_address: Address,
    own_url: EnodeUrl,
}

impl GossipNetwork for HubNetwork {
    fn gossip(&self, payload: &[u8], code: u8) -> Result<(), AnnounceError> {
        self.hub.gossip(self.own_address, payload, code);
        Ok(())
    }

    fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: &[u8],
        code: u8,
        _send_to_self: bool,
    ) -> Result<(), AnnounceError> {
        self.hub
            .multicast(self.own_address, dest_addresses, payload, code);
        Ok(())
    }

    fn find_peers(
        &self,
        node_ids: Option<&HashSet<NodeId>>,
        _purpose: PeerPurpose,
    ) -> HashMap<NodeId, Arc<dyn AnnouncePeer>> {
        self.hub.peers_of(self.own_address, node_ids)
    }

    fn self_node(&self) -> EnodeUrl {
        self.own_url.clone()
    }
}

/// One connection set shared by the whole cluster.
#[derive(Default)]
pub struct SharedDirectory {
    conn_set: RwLock<ValidatorConnSet>,
}

impl SharedDirectory {
    /// Replace the cluster-wide connection set.
    pub fn set_members(&self, members: &[Address]) {
        *self.conn_set.write() = members.iter().copied().collect();
    }
}

impl ValidatorDirectory for SharedDirectory {
    fn validator_conn_set(&self) -> Result<ValidatorConnSet, AnnounceError> {
        Ok(self.conn_set.read().clone())
    }
}

struct SimIdentity {
    keypair: Arc<Keypair>,
}

impl NodeIdentity for SimIdentity {
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

/// One simulated validator node.
pub struct SimValidator {
    /// The node's signing identity.
    pub keypair: Arc<Keypair>,
    /// The node's externally reachable URL.
    pub url: EnodeUrl,
    /// The announce service under test.
    pub service: Arc<AnnounceService>,
}

impl SimValidator {
    /// The validator's address.
    pub fn address(&self) -> Address {
        self.keypair.address()
    }
}

/// A cluster of simulated validators on one hub.
pub struct Cluster {
    /// The shared network fabric.
    pub hub: Arc<Hub>,
    /// The shared validator connection set.
    pub directory: Arc<SharedDirectory>,
    /// The nodes, in creation order.
    pub validators: Vec<SimValidator>,
}

impl Cluster {
    /// Build `n` validators on a full-mesh gossip hub, all of them in the
    /// connection set.
    pub fn new(n: usize) -> Self {
        let hub = Arc::new(Hub::default());
        let directory = Arc::new(SharedDirectory::default());

        let mut validators = Vec::with_capacity(n);
        for i in 0..n {
            let keypair = Arc::new(Keypair::generate());
            let url = EnodeUrl::new(keypair.public_key(), format!("10.0.0.{}", i + 1), 30303);
            let network = HubNetwork {
                hub: Arc::clone(&hub),
                own_address: keypair.address(),
                own_url: url.clone(),
            };

            let service = Arc::new(AnnounceService::new(
                AnnounceConfig::for_testing(),
                Arc::new(network),
                Arc::clone(&directory) as Arc<dyn ValidatorDirectory>,
                Arc::new(SimIdentity {
                    keypair: Arc::clone(&keypair),
                }),
                None,
                Box::new(InMemoryKVStore::new()),
                Box::new(InMemoryKVStore::new()),
            ));
            hub.register(keypair.address(), url.node_id(), Arc::clone(&service));

            validators.push(SimValidator {
                keypair,
                url,
                service,
            });
        }

        let members: Vec<Address> = validators.iter().map(|v| v.address()).collect();
        directory.set_members(&members);

        Self {
            hub,
            directory,
            validators,
        }
    }

    /// Build `n` validators whose gossip topology is a chain:
    /// `v0 ↔ v1 ↔ … ↔ v(n-1)`.
    pub fn new_chain(n: usize) -> Self {
        let cluster = Self::new(n);
        for window in 0..n.saturating_sub(1) {
            cluster.hub.connect_gossip(
                cluster.validators[window].address(),
                cluster.validators[window + 1].address(),
            );
        }
        cluster
    }

    /// Spawn every node's control loop; the returned senders shut them
    /// down when dropped or fired.
    pub fn spawn_loops(&self) -> Vec<oneshot::Sender<()>> {
        self.validators
            .iter()
            .map(|validator| {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let service = Arc::clone(&validator.service);
                tokio::spawn(async move {
                    service.run(shutdown_rx).await;
                });
                shutdown_tx
            })
            .collect()
    }
}
