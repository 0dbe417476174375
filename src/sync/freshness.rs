// Freshness cache - Newest verified digest build time per owner
//
// Only ever moves forward. Also remembers which fetches are in flight so a
// digest delivered twice does not produce a second request before the first
// one has had a chance to land.

use crate::model::{never, MemberId, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
struct InFlight {
    build_time: Timestamp,
    issued_at: Instant,
}

#[derive(Debug)]
pub(crate) struct FreshnessCache {
    verified: HashMap<MemberId, Timestamp>,
    in_flight: HashMap<MemberId, InFlight>,
    request_timeout: Duration,
}

impl FreshnessCache {
    pub(crate) fn new(request_timeout: Duration) -> Self {
        Self {
            verified: HashMap::new(),
            in_flight: HashMap::new(),
            request_timeout,
        }
    }

    /// Last verified build time, or `never()` for an unseen owner
    pub(crate) fn get(&self, owner: &MemberId) -> Timestamp {
        self.verified.get(owner).copied().unwrap_or_else(never)
    }

    /// True when `remote` carries information newer than what we verified
    pub(crate) fn is_behind(&self, owner: &MemberId, remote: Timestamp) -> bool {
        self.get(owner) < remote
    }

    /// Move the verified time forward; never backwards
    pub(crate) fn advance(&mut self, owner: &MemberId, build_time: Timestamp) {
        let entry = self.verified.entry(owner.clone()).or_insert_with(never);
        if *entry < build_time {
            *entry = build_time;
        }
    }

    /// Record a fetch justified by `build_time`
    ///
    /// Returns false when an equivalent or newer fetch is still in flight.
    pub(crate) fn begin_fetch(&mut self, owner: &MemberId, build_time: Timestamp) -> bool {
        let now = Instant::now();
        if let Some(pending) = self.in_flight.get(owner) {
            let alive = now.duration_since(pending.issued_at) < self.request_timeout;
            if alive && pending.build_time >= build_time {
                return false;
            }
        }
        self.in_flight.insert(
            owner.clone(),
            InFlight {
                build_time,
                issued_at: now,
            },
        );
        true
    }

    pub(crate) fn has_pending_fetch(&self, owner: &MemberId) -> bool {
        self.in_flight
            .get(owner)
            .map(|p| p.issued_at.elapsed() < self.request_timeout)
            .unwrap_or(false)
    }

    /// A response justified by `build_time` arrived for `owner`
    pub(crate) fn complete_fetch(&mut self, owner: &MemberId, build_time: Timestamp) {
        if let Some(pending) = self.in_flight.get(owner) {
            if pending.build_time <= build_time {
                self.in_flight.remove(owner);
            }
        }
        self.advance(owner, build_time);
    }
}
