// Transport module - THE WIRE (abstract)
// The Connector contract, its mailboxes and routing loop, and two
// connectors: in-process and TCP

mod local;
mod mailbox;
pub mod router;
mod tcp;
mod traits;
pub mod wire;

pub use traits::{Connector, ConnectorConfig, ConnectorError};

pub use mailbox::{EngineReceivers, Mailboxes, RouterReceivers};

pub use local::LocalConnector;
pub use tcp::{TcpConnector, TcpConnectorConfig};
pub use wire::{RpcRequest, RpcResponse, ServerInfo};
