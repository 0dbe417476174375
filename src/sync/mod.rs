// Sync module - HOW MEMBERS CONVERGE
// Handles the per-member engine, the member/store boundary and shutdown

mod diff;
mod engine;
mod freshness;
mod member;
mod shutdown;

pub use diff::{diff_keys, KeyDiff};
pub use engine::{Engine, EngineConfig, EngineError, ReconcileReport};
pub use member::{Member, MemberError};
pub use shutdown::{Shutdown, StopSignal};
