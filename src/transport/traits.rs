// Connector Traits and Core Types
// Defines the Connector contract between an Engine and its peers

use crate::config::ConfigError;
use crate::model::{DataRequest, IndexMap, Item, MemberId};
use crate::sync::{Member, StopSignal};
use crate::transport::{router, Mailboxes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// CONNECTOR CONFIG
// ============================================================================

/// Base configuration for all connector types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Capacity of each of the four mailboxes
    pub mailbox_capacity: usize,
    /// How long to wait on a full peer mailbox before dropping the message
    pub delivery_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 50,
            delivery_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "mailbox_capacity",
            });
        }
        if self.delivery_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "delivery_timeout",
            });
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur in the connector layer
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Cannot connect member {0} to itself")]
    SelfConnect(MemberId),

    #[error("Unknown peer: {0}")]
    UnknownPeer(MemberId),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Remote error: {0}")]
    Rpc(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Connector already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ConnectorError {
    /// Failures that the next digest round naturally retries
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout | Self::UnknownPeer(_) | Self::MailboxClosed | Self::Rpc(_)
        )
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<postcard::Error> for ConnectorError {
    fn from(e: postcard::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

// ============================================================================
// CONNECTOR TRAIT
// ============================================================================

/// Routes digests, data requests and data responses between one Engine and
/// its peers
///
/// Toward the engine every connector looks the same: four mailboxes. How a
/// digest or request reaches a peer (in-process hand-off, network call) is
/// the implementation's business.
#[async_trait]
pub trait Connector<I: Item>: Send + Sync + 'static {
    /// What `connect` accepts: a peer connector, an address...
    type Peer: Send + 'static;

    fn local_member(&self) -> &Member<I>;

    fn mailboxes(&self) -> &Mailboxes<I>;

    /// Register a routing edge to `peer` (mutual unless stated otherwise)
    async fn connect(&self, peer: Self::Peer) -> Result<(), ConnectorError>;

    /// Fan a locally built digest out to every directly connected peer
    async fn process_index_map(&self, index_map: IndexMap);

    /// Serve a request addressed to this member
    async fn process_data_request(&self, request: DataRequest);

    /// Pass a request on to the member it is addressed to
    async fn forward_data_request(&self, request: DataRequest);

    /// Ids of the directly connected peers
    fn peers(&self) -> Vec<MemberId>;

    /// Drive the routing loop until `stop` fires
    async fn run(self: Arc<Self>, stop: StopSignal) -> Result<(), ConnectorError> {
        router::route(self, stop).await
    }
}
