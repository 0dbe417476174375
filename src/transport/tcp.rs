// TCP Connector Implementation
// Routes digests and data requests between members over TCP
//
// Each member runs a listener answering four unary calls (Who, BackConnect,
// CollectIndexMap, GetData). Remote members are known by their advertised
// address; there are no long-lived connections.

use crate::config::ConfigError;
use crate::model::{DataRequest, DataResponse, IndexMap, Item, MemberId};
use crate::sync::{Member, StopSignal};
use crate::transport::wire::{
    read_frame, write_frame, RpcRequest, RpcResponse, ServerInfo, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_PORT,
};
use crate::transport::{router, Connector, ConnectorConfig, ConnectorError, Mailboxes};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

// ============================================================================
// TCP CONNECTOR CONFIG
// ============================================================================

/// Configuration for the TCP connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConnectorConfig {
    /// Base connector configuration
    pub base: ConnectorConfig,
    /// Address to listen on (port 0 for random)
    pub listen_address: String,
    /// Address peers should dial; defaults to the bound address
    pub advertise_address: Option<String>,
    /// Bound on one whole request/response exchange
    pub rpc_timeout: Duration,
    /// Largest accepted frame payload
    pub max_frame_size: usize,
}

impl Default for TcpConnectorConfig {
    fn default() -> Self {
        Self {
            base: ConnectorConfig::default(),
            listen_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            advertise_address: None,
            rpc_timeout: Duration::from_secs(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TcpConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_config(mut self, base: ConnectorConfig) -> Self {
        self.base = base;
        self
    }

    pub fn with_listen_address(mut self, addr: &str) -> Self {
        self.listen_address = addr.to_string();
        self
    }

    pub fn with_advertise_address(mut self, addr: &str) -> Self {
        self.advertise_address = Some(addr.to_string());
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        if self.listen_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidAddress {
                address: self.listen_address.clone(),
                reason: "expected host:port".to_string(),
            });
        }
        if let Some(advertise) = &self.advertise_address {
            let has_port = advertise
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !has_port {
                return Err(ConfigError::Invalid {
                    field: "advertise_address",
                    reason: format!("{:?} is not host:port", advertise),
                });
            }
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "rpc_timeout",
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_frame_size",
            });
        }
        Ok(())
    }
}

// ============================================================================
// TCP CONNECTOR
// ============================================================================

pub struct TcpConnector<I: Item> {
    member: Member<I>,
    mailboxes: Mailboxes<I>,
    config: TcpConnectorConfig,
    info: ServerInfo,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    remotes: RwLock<HashMap<MemberId, ServerInfo>>,
}

impl<I> TcpConnector<I>
where
    I: Item + Serialize + DeserializeOwned,
{
    /// Bind the listener; serving starts with `run`
    pub async fn bind(member: Member<I>, config: TcpConnectorConfig) -> Result<Arc<Self>, ConnectorError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_address).await?;
        let local_addr = listener.local_addr()?;
        let advertised = config
            .advertise_address
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        if config.advertise_address.is_none() && local_addr.ip().is_unspecified() {
            return Err(ConnectorError::InvalidConfig(ConfigError::Invalid {
                field: "advertise_address",
                reason: format!("listening on {} needs an address peers can dial", local_addr),
            }));
        }

        info!(member = %member.id(), address = %local_addr, "listening");

        Ok(Arc::new(Self {
            info: ServerInfo::new(member.id().clone(), advertised),
            mailboxes: Mailboxes::new(&config.base),
            member,
            config,
            local_addr,
            listener: Mutex::new(Some(listener)),
            remotes: RwLock::new(HashMap::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// What this member tells peers about itself
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn remotes(&self) -> Vec<ServerInfo> {
        let mut remotes: Vec<ServerInfo> = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        remotes.sort_by(|a, b| a.id.cmp(&b.id));
        remotes
    }

    fn register(&self, remote: ServerInfo) {
        let id = remote.id.clone();
        let previous = self
            .remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), remote);
        if previous.is_none() {
            info!(member = %self.info.id, peer = %id, "peer connected");
        }
    }

    fn remote(&self, id: &MemberId) -> Option<ServerInfo> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    // ========================================================================
    // CLIENT
    // ========================================================================

    async fn call(&self, address: &str, request: RpcRequest) -> Result<RpcResponse<I>, ConnectorError> {
        exchange(
            address,
            request,
            self.config.rpc_timeout,
            self.config.max_frame_size,
        )
        .await
    }

    /// Ask the member at `address` who it is
    pub async fn who(&self, address: &str) -> Result<ServerInfo, ConnectorError> {
        match self.call(address, RpcRequest::Who).await? {
            RpcResponse::Server(info) => Ok(info),
            other => Err(ConnectorError::UnexpectedResponse(other.kind().to_string())),
        }
    }

    async fn expect_ack(&self, address: &str, request: RpcRequest) -> Result<(), ConnectorError> {
        ack(self.call(address, request).await?)
    }

    // ========================================================================
    // SERVER
    // ========================================================================

    async fn serve(self: Arc<Self>, listener: TcpListener, mut stop: StopSignal) {
        loop {
            tokio::select! {
                _ = stop.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = this.handle_connection(stream).await {
                                debug!(member = %this.info.id, remote = %addr, error = %e, "connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(member = %self.info.id, error = %e, "accept failed");
                    }
                }
            }
        }
        info!(member = %self.info.id, "listener stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), ConnectorError> {
        let max = self.config.max_frame_size;
        let request: RpcRequest = timeout(self.config.rpc_timeout, read_frame(&mut stream, max))
            .await
            .map_err(|_| ConnectorError::Timeout)??;

        let response = self.handle(request).await;
        write_frame(&mut stream, &response, max).await
    }

    async fn handle(&self, request: RpcRequest) -> RpcResponse<I> {
        match request {
            RpcRequest::Who => RpcResponse::Server(self.info.clone()),

            RpcRequest::BackConnect(remote) => {
                if remote.id == self.info.id {
                    return RpcResponse::Error(ConnectorError::SelfConnect(remote.id).to_string());
                }
                self.register(remote);
                RpcResponse::Ack
            }

            RpcRequest::CollectIndexMap(index_map) => {
                match self.mailboxes.deliver_index_map(index_map).await {
                    Ok(()) => RpcResponse::Ack,
                    Err(e) => RpcResponse::Error(e.to_string()),
                }
            }

            RpcRequest::GetData(request) => match self.member.get_data(&request.key_id_pairs) {
                Ok(items) => RpcResponse::Data(DataResponse::for_request(&request, items)),
                Err(e) => RpcResponse::Error(e.to_string()),
            },
        }
    }
}

/// One unary exchange with the member listening at `address`
async fn exchange<I>(
    address: &str,
    request: RpcRequest,
    rpc_timeout: Duration,
    max: usize,
) -> Result<RpcResponse<I>, ConnectorError>
where
    I: Item + DeserializeOwned,
{
    let call = async {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true).ok();
        write_frame(&mut stream, &request, max).await?;
        read_frame::<_, RpcResponse<I>>(&mut stream, max).await
    };

    match timeout(rpc_timeout, call).await {
        Err(_) => Err(ConnectorError::Timeout),
        Ok(Ok(RpcResponse::Error(message))) => Err(ConnectorError::Rpc(message)),
        Ok(result) => result,
    }
}

fn ack<I: Item>(response: RpcResponse<I>) -> Result<(), ConnectorError> {
    match response {
        RpcResponse::Ack => Ok(()),
        other => Err(ConnectorError::UnexpectedResponse(other.kind().to_string())),
    }
}

#[async_trait]
impl<I> Connector<I> for TcpConnector<I>
where
    I: Item + Serialize + DeserializeOwned,
{
    /// Address of the remote member to dial
    type Peer = String;

    fn local_member(&self) -> &Member<I> {
        &self.member
    }

    fn mailboxes(&self) -> &Mailboxes<I> {
        &self.mailboxes
    }

    async fn connect(&self, address: String) -> Result<(), ConnectorError> {
        let who = self.who(&address).await?;
        if who.id == self.info.id {
            return Err(ConnectorError::SelfConnect(who.id));
        }

        self.register(ServerInfo::new(who.id, address.clone()));
        self.expect_ack(&address, RpcRequest::BackConnect(self.info.clone()))
            .await
    }

    async fn process_index_map(&self, index_map: IndexMap) {
        // One slow peer must not hold the digest back from the others
        let mut calls = JoinSet::new();
        for remote in self.remotes() {
            let request = RpcRequest::CollectIndexMap(index_map.clone());
            let rpc_timeout = self.config.rpc_timeout;
            let max = self.config.max_frame_size;
            calls.spawn(async move {
                let result = exchange::<I>(&remote.address, request, rpc_timeout, max)
                    .await
                    .and_then(ack);
                (remote.id, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((peer, Err(e))) => {
                    warn!(member = %self.info.id, peer = %peer, error = %e, "dropped index map");
                }
                Err(e) => warn!(member = %self.info.id, error = %e, "index map task failed"),
            }
        }
    }

    async fn process_data_request(&self, request: DataRequest) {
        // Remote requesters pull with GetData; only a request this member
        // addressed to itself ends up here.
        if request.source != self.info.id {
            warn!(member = %self.info.id, requester = %request.source, "no push path to remote requester, dropping");
            return;
        }
        match self.member.get_data(&request.key_id_pairs) {
            Ok(items) => {
                let response = DataResponse::for_request(&request, items);
                if let Err(e) = self.mailboxes.deliver_data(response).await {
                    warn!(member = %self.info.id, error = %e, "dropped data response");
                }
            }
            Err(e) => warn!(member = %self.info.id, error = %e, "failed to read requested items"),
        }
    }

    async fn forward_data_request(&self, request: DataRequest) {
        let Some(remote) = self.remote(&request.destination) else {
            warn!(member = %self.info.id, destination = %request.destination, "unknown destination, dropping request");
            return;
        };

        match self.call(&remote.address, RpcRequest::GetData(request)).await {
            Ok(RpcResponse::Data(response)) => {
                debug!(member = %self.info.id, peer = %remote.id, items = response.items.len(), "received data");
                if let Err(e) = self.mailboxes.deliver_data(response).await {
                    warn!(member = %self.info.id, error = %e, "dropped data response");
                }
            }
            Ok(other) => {
                warn!(member = %self.info.id, peer = %remote.id, response = other.kind(), "unexpected response to data request");
            }
            Err(e) => {
                warn!(member = %self.info.id, peer = %remote.id, error = %e, "data request failed");
            }
        }
    }

    fn peers(&self) -> Vec<MemberId> {
        self.remotes().into_iter().map(|r| r.id).collect()
    }

    /// Serve the listener and drive the router until `stop` fires
    async fn run(self: Arc<Self>, stop: StopSignal) -> Result<(), ConnectorError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ConnectorError::AlreadyRunning)?;

        let server = tokio::spawn(Arc::clone(&self).serve(listener, stop.clone()));
        let routed = router::route(self, stop).await;

        if let Err(e) = server.await {
            warn!(error = %e, "listener task failed");
        }
        routed
    }
}
