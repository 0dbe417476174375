// Local Connector - In-process routing between connectors of one program
//
// Peers are other LocalConnectors held by Weak, so a mutual edge never keeps
// either side alive. Digests and responses are handed straight into the
// peer's mailboxes; forwarded requests land in the destination's request-keys
// mailbox and are served by its own router.

use crate::model::{DataRequest, DataResponse, IndexMap, Item, MemberId};
use crate::sync::Member;
use crate::transport::{Connector, ConnectorConfig, ConnectorError, Mailboxes};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

pub struct LocalConnector<I: Item> {
    member: Member<I>,
    mailboxes: Mailboxes<I>,
    peers: RwLock<HashMap<MemberId, Weak<LocalConnector<I>>>>,
    this: Weak<LocalConnector<I>>,
}

impl<I: Item> LocalConnector<I> {
    pub fn new(member: Member<I>, config: ConnectorConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            member,
            mailboxes: Mailboxes::new(&config),
            peers: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &MemberId {
        self.member.id()
    }

    /// Register `peer` without the back edge
    pub fn connect_one_way(&self, peer: Arc<LocalConnector<I>>) -> Result<(), ConnectorError> {
        if peer.id() == self.id() {
            return Err(ConnectorError::SelfConnect(self.id().clone()));
        }
        let peer_id = peer.id().clone();
        let added = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id.clone(), Arc::downgrade(&peer))
            .map_or(true, |previous| previous.strong_count() == 0);
        if added {
            info!(member = %self.id(), peer = %peer_id, "peer connected");
        }
        Ok(())
    }

    /// Drop the edge to `peer_id`, this side only
    pub fn disconnect(&self, peer_id: &MemberId) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id)
            .is_some()
    }

    fn peer(&self, id: &MemberId) -> Option<Arc<LocalConnector<I>>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(Weak::upgrade)
    }

    fn all_peers(&self) -> Vec<Arc<LocalConnector<I>>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

#[async_trait]
impl<I: Item> Connector<I> for LocalConnector<I> {
    type Peer = Arc<LocalConnector<I>>;

    fn local_member(&self) -> &Member<I> {
        &self.member
    }

    fn mailboxes(&self) -> &Mailboxes<I> {
        &self.mailboxes
    }

    async fn connect(&self, peer: Self::Peer) -> Result<(), ConnectorError> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| ConnectorError::UnknownPeer(self.id().clone()))?;
        self.connect_one_way(Arc::clone(&peer))?;
        peer.connect_one_way(this)
    }

    async fn process_index_map(&self, index_map: IndexMap) {
        for peer in self.all_peers() {
            if let Err(e) = peer.mailboxes.deliver_index_map(index_map.clone()).await {
                warn!(member = %self.id(), peer = %peer.id(), error = %e, "dropped index map");
            }
        }
    }

    async fn process_data_request(&self, request: DataRequest) {
        let items = match self.member.get_data(&request.key_id_pairs) {
            Ok(items) => items,
            Err(e) => {
                warn!(member = %self.id(), error = %e, "failed to read requested items");
                return;
            }
        };
        let response = DataResponse::for_request(&request, items);

        let requester = if &request.source == self.id() {
            self.this.upgrade()
        } else {
            self.peer(&request.source)
        };
        match requester {
            Some(requester) => {
                debug!(member = %self.id(), requester = %request.source, items = response.items.len(), "sending data response");
                if let Err(e) = requester.mailboxes.deliver_data(response).await {
                    warn!(member = %self.id(), requester = %request.source, error = %e, "dropped data response");
                }
            }
            None => {
                warn!(member = %self.id(), requester = %request.source, "unknown requester, dropping response");
            }
        }
    }

    async fn forward_data_request(&self, request: DataRequest) {
        match self.peer(&request.destination) {
            Some(destination) => {
                let destination_id = destination.id().clone();
                if let Err(e) = destination.mailboxes.request_keys(request).await {
                    warn!(member = %self.id(), destination = %destination_id, error = %e, "dropped data request");
                }
            }
            None => {
                warn!(member = %self.id(), destination = %request.destination, "unknown destination, dropping request");
            }
        }
    }

    fn peers(&self) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, peer)| peer.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
