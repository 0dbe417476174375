// Sync Engine - The heart of anti-entropy synchronization
//
// One engine drives one member's participation in gossip:
// - Outbound: every sync period, stamp the local digest and queue it for fan-out
// - Inbound digests: reconcile each peer digest against the local store
// - Inbound data: apply fetched items and advance the freshness cache
//
// A digest only triggers work when its build time for an owner is strictly
// newer than what this engine has already verified for that owner.

use crate::config::ConfigError;
use crate::model::{
    never, DataRequest, DataResponse, IndexMap, Item, KeyIdPair, MemberId, StampedKeys, Timestamp,
};
use crate::storage::StoreError;
use crate::sync::diff::diff_keys;
use crate::sync::freshness::FreshnessCache;
use crate::sync::{Member, MemberError, StopSignal};
use crate::transport::{Connector, ConnectorError, EngineReceivers};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Engine-related errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Member error: {0}")]
    Member(#[from] MemberError),

    #[error("Engine task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Configuration for the sync engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between two outbound digests
    pub sync_period: Duration,
    /// Wake-up interval of the inbound loops when idle
    pub idle_tick: Duration,
    /// How long an unanswered fetch blocks an identical one
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(1),
            idle_tick: Duration::from_secs(20),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    pub fn with_idle_tick(mut self, tick: Duration) -> Self {
        self.idle_tick = tick;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_period.is_zero() {
            return Err(ConfigError::Zero {
                field: "sync_period",
            });
        }
        if self.idle_tick.is_zero() {
            return Err(ConfigError::Zero { field: "idle_tick" });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "request_timeout",
            });
        }
        Ok(())
    }
}

/// What one reconciliation pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Requests queued for the connector, at most one per owner
    pub requested: Vec<DataRequest>,
    /// Keys removed from the local store
    pub deleted: Vec<KeyIdPair>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty() && self.deleted.is_empty()
    }
}

/// Last own digest broadcast and the build time it was given
struct OwnDigest {
    keys: StampedKeys,
    build_time: Timestamp,
}

/// The sync engine - one per member
pub struct Engine<I: Item, C: Connector<I>> {
    member: Member<I>,
    connector: Arc<C>,
    config: EngineConfig,
    cache: Mutex<FreshnessCache>,
    own: Mutex<Option<OwnDigest>>,
}

impl<I: Item, C: Connector<I>> Engine<I, C> {
    pub fn new(connector: Arc<C>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            member: connector.local_member().clone(),
            cache: Mutex::new(FreshnessCache::new(config.request_timeout)),
            own: Mutex::new(None),
            connector,
            config,
        })
    }

    pub fn id(&self) -> &MemberId {
        self.member.id()
    }

    pub fn member(&self) -> &Member<I> {
        &self.member
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a gossip edge to `peer`
    pub async fn add_member(&self, peer: C::Peer) -> Result<(), EngineError> {
        self.connector.connect(peer).await?;
        Ok(())
    }

    /// Newest verified build time for `owner`
    pub fn freshness(&self, owner: &MemberId) -> Timestamp {
        self.cache().get(owner)
    }

    fn cache(&self) -> MutexGuard<'_, FreshnessCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    /// The digest this member would broadcast right now
    ///
    /// Other owners carry the build time verified for them; the own entry
    /// carries the time of its last change.
    pub fn local_index_map(&self) -> Result<IndexMap, StoreError> {
        // Keys and the build times stamped on them must come from one view
        let mut cache = self.cache();
        let mut index_map = self.member.indexes()?;
        let own_id = self.id().clone();

        for (owner, index) in index_map.indexes.iter_mut() {
            index.build_time = if owner == &own_id {
                self.own_build_time(&index.stamped_keys, &mut cache)
            } else {
                cache.get(owner)
            };
        }
        Ok(index_map)
    }

    fn own_build_time(&self, keys: &StampedKeys, cache: &mut FreshnessCache) -> Timestamp {
        let mut own = self.own.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = own.as_ref() {
            if &previous.keys == keys {
                return previous.build_time;
            }
        }

        let previous = own.as_ref().map(|o| o.build_time).unwrap_or_else(never);
        let now = Utc::now();
        let build_time = if now > previous {
            now
        } else {
            previous + chrono::Duration::nanoseconds(1)
        };

        debug!(member = %self.id(), keys = keys.len(), "own digest changed");
        *own = Some(OwnDigest {
            keys: keys.clone(),
            build_time,
        });
        cache.advance(self.id(), build_time);
        build_time
    }

    /// One outbound tick: stamp the digest and queue it for fan-out
    pub async fn broadcast_indexes(&self) -> Result<(), EngineError> {
        let index_map = self.local_index_map()?;
        self.connector
            .mailboxes()
            .send_index_map(index_map)
            .await?;
        Ok(())
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Reconcile a peer digest and queue the resulting data requests
    pub async fn check_and_get_updates(&self, remote: &IndexMap) -> ReconcileReport {
        let report = self.reconcile(remote);

        for request in &report.requested {
            if let Err(e) = self
                .connector
                .mailboxes()
                .request_keys(request.clone())
                .await
            {
                warn!(member = %self.id(), destination = %request.destination, error = %e, "dropped data request");
            }
        }
        report
    }

    fn reconcile(&self, remote: &IndexMap) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let own_id = self.id();
        if &remote.source == own_id {
            return report;
        }

        let local = match self.member.indexes() {
            Ok(local) => local,
            Err(e) => {
                warn!(member = %own_id, error = %e, "failed to read local indexes");
                return report;
            }
        };

        let owners: BTreeSet<&MemberId> = local
            .indexes
            .keys()
            .chain(remote.indexes.keys())
            .filter(|owner| *owner != own_id)
            .collect();

        let empty = StampedKeys::new();
        let mut cache = self.cache();

        for owner in owners {
            // An owner the peer never mentions tells us nothing about its keys
            let Some(remote_index) = remote.get(owner) else {
                continue;
            };
            let build_time = remote_index.build_time;

            if !cache.is_behind(owner, build_time) {
                trace!(member = %own_id, owner = %owner, "digest not newer, skipping");
                continue;
            }

            let local_keys = local
                .get(owner)
                .map(|index| &index.stamped_keys)
                .unwrap_or(&empty);
            let diff = diff_keys(local_keys, &remote_index.stamped_keys);

            if diff.is_empty() {
                cache.advance(owner, build_time);
                continue;
            }

            if !diff.fetch.is_empty() && cache.begin_fetch(owner, build_time) {
                let pairs = diff
                    .fetch
                    .into_iter()
                    .map(|key| KeyIdPair::new(owner.clone(), key))
                    .collect();
                let request = DataRequest::new(own_id.clone(), remote.source.clone(), pairs)
                    .with_build_time(owner.clone(), build_time);
                debug!(member = %own_id, owner = %owner, keys = request.key_id_pairs.len(), "requesting data");
                report.requested.push(request);
            }

            if !diff.delete.is_empty() {
                let pairs: Vec<KeyIdPair> = diff
                    .delete
                    .into_iter()
                    .map(|key| KeyIdPair::new(owner.clone(), key))
                    .collect();
                match self.member.delete(&pairs) {
                    Ok(()) => {
                        debug!(member = %own_id, owner = %owner, keys = pairs.len(), "deleted keys");
                        report.deleted.extend(pairs);
                        if !cache.has_pending_fetch(owner) {
                            cache.advance(owner, build_time);
                        }
                    }
                    Err(e) => {
                        warn!(member = %own_id, owner = %owner, error = %e, "failed to delete keys");
                    }
                }
            }
        }

        report
    }

    /// Apply fetched items and advance the freshness cache
    ///
    /// Returns how many items were written. Items this member owns are never
    /// taken from a peer, and items justified by a build time older than the
    /// one already verified are stale and dropped.
    pub fn apply_data_response(&self, response: DataResponse<I>) -> usize {
        let DataResponse {
            associated_build_time,
            items,
        } = response;
        let own_id = self.id();
        let mut cache = self.cache();

        let fresh: Vec<I> = items
            .into_iter()
            .filter(|item| {
                let owner = item.owned_by();
                if owner == own_id {
                    return false;
                }
                match associated_build_time.get(owner) {
                    Some(justified) => cache.get(owner) <= *justified,
                    None => true,
                }
            })
            .collect();

        let written = match self.member.put(fresh) {
            Ok(written) => written,
            Err(e) => {
                warn!(member = %own_id, error = %e, "failed to store received items");
                return 0;
            }
        };

        for (owner, build_time) in associated_build_time {
            if &owner != own_id {
                cache.complete_fetch(&owner, build_time);
            }
        }

        if written > 0 {
            debug!(member = %own_id, items = written, "applied data response");
        }
        written
    }

    // ========================================================================
    // LOOPS
    // ========================================================================

    /// Run every loop plus the connector until `stop` fires
    ///
    /// Returns once all of them have exited.
    pub async fn run(self: Arc<Self>, stop: StopSignal) -> Result<(), EngineError> {
        let EngineReceivers {
            receive_index,
            receive_data,
        } = self
            .connector
            .mailboxes()
            .take_engine_receivers()
            .ok_or(EngineError::AlreadyRunning)?;

        info!(member = %self.id(), peers = self.connector.peers().len(), "engine started");

        let loops = [
            tokio::spawn(Arc::clone(&self).outbound_loop(stop.clone())),
            tokio::spawn(Arc::clone(&self).inbound_index_loop(receive_index, stop.clone())),
            tokio::spawn(Arc::clone(&self).inbound_data_loop(receive_data, stop.clone())),
        ];
        let connector = tokio::spawn(Arc::clone(&self.connector).run(stop));

        let mut failure = None;
        for handle in loops {
            if let Err(e) = handle.await {
                failure.get_or_insert(EngineError::Task(e.to_string()));
            }
        }
        match connector.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure.get_or_insert(EngineError::Connector(e));
            }
            Err(e) => {
                failure.get_or_insert(EngineError::Task(e.to_string()));
            }
        }

        info!(member = %self.id(), "engine stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn outbound_loop(self: Arc<Self>, mut stop: StopSignal) {
        let mut ticker = tokio::time::interval(self.config.sync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.broadcast_indexes().await {
                        warn!(member = %self.id(), error = %e, "failed to broadcast indexes");
                    }
                }
            }
        }
    }

    async fn inbound_index_loop(
        self: Arc<Self>,
        mut receive_index: mpsc::Receiver<IndexMap>,
        mut stop: StopSignal,
    ) {
        let mut idle = tokio::time::interval(self.config.idle_tick);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                received = receive_index.recv() => match received {
                    Some(index_map) => {
                        self.check_and_get_updates(&index_map).await;
                    }
                    None => break,
                },
                _ = idle.tick() => trace!(member = %self.id(), "index loop idle"),
            }
        }
    }

    async fn inbound_data_loop(
        self: Arc<Self>,
        mut receive_data: mpsc::Receiver<DataResponse<I>>,
        mut stop: StopSignal,
    ) {
        let mut idle = tokio::time::interval(self.config.idle_tick);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                received = receive_data.recv() => match received {
                    Some(response) => {
                        self.apply_data_response(response);
                    }
                    None => break,
                },
                _ = idle.tick() => trace!(member = %self.id(), "data loop idle"),
            }
        }
    }
}
