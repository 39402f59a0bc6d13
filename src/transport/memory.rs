//! # In-memory transport
//! Connects sockets of the same process through `inproc://name` endpoints registered in a
//! shared [`MemoryNetwork`]. Operations are handed over directly to the inward queue of the
//! peer, no threads are involved.

use crate::core::config::TransportConfiguration;
use crate::core::message::PeerId;
use crate::core::queue::InwardQueue;
use crate::core::socket::{OpFlag, PeerIdentification, SocketError};
use crate::core::transport::{
    AcceptorTransport, InitiatorTransport, Inward, ModelId, Operation, PeerEvent, Transport,
    TransportFactory, TransportMethod,
};
use crate::transport::peers::{Connection, PeerTable};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

struct MemoryConnection {
    remote_queue: InwardQueue,
    remote_peer_id: PeerId,
    /// Shared by both ends of the connection
    open: Arc<AtomicBool>,
}

impl Connection for MemoryConnection {
    fn send(&mut self, operation: Operation) -> Result<(), SocketError> {
        if self.open.load(Ordering::SeqCst) {
            self.remote_queue
                .push(Inward::received(self.remote_peer_id, operation))
        } else {
            Err(SocketError::Disconnected)
        }
    }

    fn close(self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self
                .remote_queue
                .push(Inward::disconnected(self.remote_peer_id));
        }
    }
}

struct MemoryShared {
    peers: Mutex<PeerTable<MemoryConnection>>,
    queue: InwardQueue,
    model: Mutex<Option<ModelId>>,
}

/// Registry of bound `inproc://` names. Transports created from clones of the same network
/// can reach each other.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<String, Weak<MemoryShared>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        self.transport_with_configuration(TransportConfiguration::new())
    }

    pub fn transport_with_configuration(&self, config: TransportConfiguration) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            shared: Arc::new(MemoryShared {
                peers: Mutex::new(PeerTable::new()),
                queue: InwardQueue::new(config.queue_policy),
                model: Mutex::new(None),
            }),
            bound: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<MemoryShared>, SocketError> {
        self.endpoints
            .lock()
            .map_err(SocketError::poisoned)?
            .get(name)
            .and_then(Weak::upgrade)
            .ok_or(SocketError::TransportTargetUnreachable)
    }
}

impl TransportFactory for MemoryNetwork {
    type Transport = MemoryTransport;

    fn create(&self) -> Self::Transport {
        self.transport()
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    shared: Arc<MemoryShared>,
    bound: Vec<String>,
}

impl MemoryTransport {
    fn shutdown(&mut self) {
        if let Ok(mut endpoints) = self.network.endpoints.lock() {
            for name in self.bound.drain(..) {
                let owned = endpoints
                    .get(&name)
                    .map(|shared| Weak::ptr_eq(shared, &Arc::downgrade(&self.shared)))
                    .unwrap_or(false);
                if owned {
                    endpoints.remove(&name);
                }
            }
        }
        let connections = match self.shared.peers.lock() {
            Ok(mut peers) => peers.drain(),
            Err(_) => Vec::new(),
        };
        for connection in connections {
            connection.close();
        }
    }
}

impl Transport for MemoryTransport {
    fn announce_model(&mut self, model_id: ModelId) {
        if let Ok(mut model) = self.shared.model.lock() {
            *model = Some(model_id);
        }
    }

    fn send(&mut self, peer_id: PeerId, operation: Operation) -> Result<(), SocketError> {
        self.shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .send(peer_id, operation)
    }

    fn receive(&mut self, flags: OpFlag) -> Result<Inward, SocketError> {
        let inward = self.shared.queue.pop(flags)?;
        if inward.event == PeerEvent::Disconnected {
            let connection = self
                .shared
                .peers
                .lock()
                .map_err(SocketError::poisoned)?
                .remove_peer(&inward.peer_id);
            if let Some(connection) = connection {
                connection.close();
            }
        }
        Ok(inward)
    }

    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<Option<PeerId>, SocketError> {
        let (peer_id, connection) = self
            .shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .remove(&peer_identification)?;
        connection.close();
        debug!(peer = %peer_id, "connection closed");
        Ok(Some(peer_id))
    }

    fn query_connected_peers(&self) -> HashSet<PeerId> {
        self.shared
            .peers
            .lock()
            .map(|peers| peers.peers())
            .unwrap_or_default()
    }

    fn close(mut self) -> Result<(), SocketError> {
        self.shutdown();
        Ok(())
    }
}

impl InitiatorTransport for MemoryTransport {
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        let name = match &target {
            TransportMethod::Memory(name) => name,
            _ => return Err(SocketError::InvalidTransportMethod),
        };
        let already_connected = self
            .shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .is_connected(&target);
        if already_connected {
            return Err(SocketError::AlreadyConnected);
        }

        let remote = self.network.lookup(name)?;
        let local_model = *self.shared.model.lock().map_err(SocketError::poisoned)?;
        let remote_model = *remote.model.lock().map_err(SocketError::poisoned)?;
        let local_peer_id = PeerId::new_random();
        let remote_peer_id = PeerId::new_random();
        let open = Arc::new(AtomicBool::new(true));

        // Handshakes are queued while the remote table is locked so that they precede
        // anything either side sends on the new connection.
        {
            let mut remote_peers = remote.peers.lock().map_err(SocketError::poisoned)?;
            if let Some(model_id) = remote_model {
                self.shared.queue.push(Inward::received(
                    local_peer_id,
                    Operation::Handshake(model_id),
                ))?;
            }
            if let Some(model_id) = local_model {
                remote.queue.push(Inward::received(
                    remote_peer_id,
                    Operation::Handshake(model_id),
                ))?;
            }
            remote_peers.insert(
                remote_peer_id,
                None,
                MemoryConnection {
                    remote_queue: self.shared.queue.clone(),
                    remote_peer_id: local_peer_id,
                    open: open.clone(),
                },
            );
        }

        self.shared.peers.lock().map_err(SocketError::poisoned)?.insert(
            local_peer_id,
            Some(target.clone()),
            MemoryConnection {
                remote_queue: remote.queue.clone(),
                remote_peer_id,
                open,
            },
        );
        debug!(peer = %local_peer_id, endpoint = %target, "connected");
        Ok(Some(local_peer_id))
    }
}

impl AcceptorTransport for MemoryTransport {
    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        let name = match &target {
            TransportMethod::Memory(name) => name.clone(),
            _ => return Err(SocketError::InvalidTransportMethod),
        };
        let mut endpoints = self
            .network
            .endpoints
            .lock()
            .map_err(SocketError::poisoned)?;
        let taken = endpoints
            .get(&name)
            .map(|shared| shared.upgrade().is_some())
            .unwrap_or(false);
        if taken {
            return Err(SocketError::TransportMethodAlreadyInUse);
        }
        endpoints.insert(name.clone(), Arc::downgrade(&self.shared));
        drop(endpoints);
        self.bound.push(name);
        info!(endpoint = %target, "listening");
        Ok(None)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
