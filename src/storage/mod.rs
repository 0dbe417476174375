// Storage module - PERSISTENCE
// The Store contract plus an in-memory and a sled-backed implementation

mod memory;
mod store;
mod traits;

pub use memory::MapStore;
pub use store::SledStore;
pub use traits::{Store, StoreError};
