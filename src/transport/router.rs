// Router - The routing loop shared by every connector
//
// Selects over the send-index and request-keys mailboxes and the stop
// signal. Every message is dispatched on its own task so a slow peer never
// stalls the loop.

use crate::model::Item;
use crate::sync::StopSignal;
use crate::transport::{Connector, ConnectorError, RouterReceivers};
use std::sync::Arc;
use tracing::{debug, info};

pub async fn route<I, C>(connector: Arc<C>, mut stop: StopSignal) -> Result<(), ConnectorError>
where
    I: Item,
    C: Connector<I> + ?Sized,
{
    let RouterReceivers {
        mut send_index,
        mut request_keys,
    } = connector
        .mailboxes()
        .take_router_receivers()
        .ok_or(ConnectorError::AlreadyRunning)?;

    let local = connector.local_member().id().clone();
    info!(member = %local, "router started");

    loop {
        tokio::select! {
            _ = stop.wait() => break,

            Some(index_map) = send_index.recv() => {
                let connector = Arc::clone(&connector);
                tokio::spawn(async move {
                    connector.process_index_map(index_map).await;
                });
            }

            Some(request) = request_keys.recv() => {
                let connector = Arc::clone(&connector);
                if request.destination == local {
                    debug!(member = %local, source = %request.source, keys = request.key_id_pairs.len(), "serving data request");
                    tokio::spawn(async move {
                        connector.process_data_request(request).await;
                    });
                } else {
                    debug!(member = %local, destination = %request.destination, "forwarding data request");
                    tokio::spawn(async move {
                        connector.forward_data_request(request).await;
                    });
                }
            }
        }
    }

    info!(member = %local, "router stopped");
    Ok(())
}
