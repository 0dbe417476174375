//! datafan - anti-entropy gossip synchronization
//!
//! Every member owns a partition of a key-value dataset and periodically
//! gossips compact digests of everything it knows to its direct peers.
//! Members fetch what is newer, delete what the owner no longer lists, and
//! every member reachable through the peer graph converges on the same data.

pub mod config;
pub mod model;
pub mod sim;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::ConfigError;
pub use model::{Item, MemberId, Record};
pub use storage::{MapStore, SledStore, Store};
pub use sync::{Engine, EngineConfig, Member, Shutdown, StopSignal};
pub use transport::{Connector, LocalConnector, TcpConnector};
