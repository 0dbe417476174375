// Model module - WHAT IS SYNCHRONIZED
// Identifiers, items, digests and the request/response messages

mod item;
mod message;
mod types;

pub use item::{Item, Record};
pub use message::{DataRequest, DataResponse};
pub use types::{
    never, Index, IndexMap, Key, KeyIdPair, MemberId, StampedKey, StampedKeys, Timestamp,
};
