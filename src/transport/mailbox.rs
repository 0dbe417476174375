// Mailboxes - The four bounded channels between an Engine and its connector
//
//   send-index     engine -> router      digests to fan out
//   receive-index  peers  -> engine      digests to reconcile
//   request-keys   engine/peers -> router data requests to serve or forward
//   receive-data   peers  -> engine      data responses to apply
//
// Senders live here for the lifetime of the connector. Each receiver pair is
// claimed exactly once: the engine claims its own, the router claims its own.

use crate::model::{DataRequest, DataResponse, IndexMap};
use crate::transport::{ConnectorConfig, ConnectorError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Receive ends consumed by the engine loops
pub struct EngineReceivers<I> {
    pub receive_index: mpsc::Receiver<IndexMap>,
    pub receive_data: mpsc::Receiver<DataResponse<I>>,
}

/// Receive ends consumed by the routing loop
pub struct RouterReceivers {
    pub send_index: mpsc::Receiver<IndexMap>,
    pub request_keys: mpsc::Receiver<DataRequest>,
}

pub struct Mailboxes<I> {
    send_index: mpsc::Sender<IndexMap>,
    receive_index: mpsc::Sender<IndexMap>,
    request_keys: mpsc::Sender<DataRequest>,
    receive_data: mpsc::Sender<DataResponse<I>>,
    engine: Mutex<Option<EngineReceivers<I>>>,
    router: Mutex<Option<RouterReceivers>>,
    delivery_timeout: Duration,
}

impl<I: Send + 'static> Mailboxes<I> {
    pub fn new(config: &ConnectorConfig) -> Self {
        let capacity = config.mailbox_capacity.max(1);
        let (send_index, send_index_rx) = mpsc::channel(capacity);
        let (receive_index, receive_index_rx) = mpsc::channel(capacity);
        let (request_keys, request_keys_rx) = mpsc::channel(capacity);
        let (receive_data, receive_data_rx) = mpsc::channel(capacity);

        Self {
            send_index,
            receive_index,
            request_keys,
            receive_data,
            engine: Mutex::new(Some(EngineReceivers {
                receive_index: receive_index_rx,
                receive_data: receive_data_rx,
            })),
            router: Mutex::new(Some(RouterReceivers {
                send_index: send_index_rx,
                request_keys: request_keys_rx,
            })),
            delivery_timeout: config.delivery_timeout,
        }
    }

    /// Claim the engine's receive ends; None once claimed
    pub fn take_engine_receivers(&self) -> Option<EngineReceivers<I>> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Claim the router's receive ends; None once claimed
    pub fn take_router_receivers(&self) -> Option<RouterReceivers> {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ========================================================================
    // DELIVERY
    // ========================================================================

    /// Queue a local digest for fan-out
    pub async fn send_index_map(&self, index_map: IndexMap) -> Result<(), ConnectorError> {
        deliver(&self.send_index, index_map, self.delivery_timeout).await
    }

    /// Hand a digest to this member's engine
    pub async fn deliver_index_map(&self, index_map: IndexMap) -> Result<(), ConnectorError> {
        deliver(&self.receive_index, index_map, self.delivery_timeout).await
    }

    /// Queue a data request for this member's router
    pub async fn request_keys(&self, request: DataRequest) -> Result<(), ConnectorError> {
        deliver(&self.request_keys, request, self.delivery_timeout).await
    }

    /// Hand a data response to this member's engine
    pub async fn deliver_data(&self, response: DataResponse<I>) -> Result<(), ConnectorError> {
        deliver(&self.receive_data, response, self.delivery_timeout).await
    }
}

async fn deliver<T>(
    tx: &mpsc::Sender<T>,
    message: T,
    timeout: Duration,
) -> Result<(), ConnectorError> {
    tx.send_timeout(message, timeout).await.map_err(|e| match e {
        SendTimeoutError::Timeout(_) => ConnectorError::Timeout,
        SendTimeoutError::Closed(_) => ConnectorError::MailboxClosed,
    })
}
