// LocalMesh - An in-process cluster of members wired by LocalConnectors
//
// Each member gets its own MapStore, connector, engine and stop signal, so a
// single engine can be stopped while the rest keep running.

use crate::model::{Item, KeyIdPair, MemberId, Record};
use crate::sim::Topology;
use crate::storage::{MapStore, Store};
use crate::sync::{Engine, EngineConfig, EngineError, Member, Shutdown};
use crate::transport::{ConnectorConfig, LocalConnector};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::warn;

pub type LocalEngine = Engine<Record, LocalConnector<Record>>;

/// How often the wait helpers re-check the stores
const CHECK_PERIOD: Duration = Duration::from_millis(10);

struct Node {
    store: Arc<MapStore<Record>>,
    engine: Arc<LocalEngine>,
    shutdown: Shutdown,
    handle: Option<JoinHandle<Result<(), EngineError>>>,
}

pub struct LocalMesh {
    nodes: Vec<Node>,
}

impl LocalMesh {
    /// `n` unconnected members named M0..Mn-1
    pub fn new(n: usize, config: EngineConfig) -> Result<Self, EngineError> {
        let ids: Vec<String> = (0..n).map(|i| format!("M{}", i)).collect();
        Self::with_ids(&ids, config)
    }

    pub fn with_ids<S: AsRef<str>>(ids: &[S], config: EngineConfig) -> Result<Self, EngineError> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            let store = Arc::new(MapStore::<Record>::new());
            let member = Member::new(id.as_ref(), Arc::clone(&store) as Arc<dyn Store<Record>>);
            let connector = LocalConnector::new(member, ConnectorConfig::default());
            let engine = Arc::new(Engine::new(connector, config.clone())?);
            nodes.push(Node {
                store,
                engine,
                shutdown: Shutdown::new(),
                handle: None,
            });
        }
        Ok(Self { nodes })
    }

    /// `n` members connected according to `topology`
    pub async fn with_topology<R: Rng + ?Sized>(
        n: usize,
        topology: Topology,
        rng: &mut R,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let mesh = Self::new(n, config)?;
        for (i, j) in topology.edges(n, rng) {
            mesh.connect(i, j).await?;
        }
        Ok(mesh)
    }

    /// Mutual gossip edge between members `i` and `j`
    pub async fn connect(&self, i: usize, j: usize) -> Result<(), EngineError> {
        let peer = Arc::clone(self.nodes[j].engine.connector());
        self.nodes[i].engine.add_member(peer).await
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn member(&self, i: usize) -> &Member<Record> {
        self.nodes[i].engine.member()
    }

    pub fn store(&self, i: usize) -> &Arc<MapStore<Record>> {
        &self.nodes[i].store
    }

    pub fn engine(&self, i: usize) -> &Arc<LocalEngine> {
        &self.nodes[i].engine
    }

    pub fn id(&self, i: usize) -> &MemberId {
        self.nodes[i].engine.id()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start every engine not yet started
    pub fn start(&mut self) {
        let all: Vec<usize> = (0..self.nodes.len()).collect();
        self.start_only(&all);
    }

    pub fn start_only(&mut self, indices: &[usize]) {
        for &i in indices {
            let node = &mut self.nodes[i];
            if node.handle.is_none() {
                let engine = Arc::clone(&node.engine);
                node.handle = Some(tokio::spawn(engine.run(node.shutdown.signal())));
            }
        }
    }

    /// Stop one engine and wait for all of its loops to exit
    pub async fn stop_member(&mut self, i: usize) -> Result<(), EngineError> {
        let node = &mut self.nodes[i];
        node.shutdown.trigger();
        match node.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| EngineError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Stop every engine; reports the first failure
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        for node in &self.nodes {
            node.shutdown.trigger();
        }
        let mut first = Ok(());
        for i in 0..self.nodes.len() {
            if let Err(e) = self.stop_member(i).await {
                warn!(member = %self.id(i), error = %e, "engine failed");
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    pub fn counts(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .map(|n| n.store.count().unwrap_or(0))
            .collect()
    }

    /// Every member holds exactly the same items
    pub fn converged(&self) -> bool {
        let mut snapshots = self.nodes.iter().map(|n| n.store.snapshot().ok());
        match snapshots.next() {
            Some(first) => first.is_some() && snapshots.all(|s| s == first),
            None => true,
        }
    }

    /// Poll until `check` holds or `timeout` elapses
    pub async fn wait_until<F>(&self, timeout: Duration, check: F) -> bool
    where
        F: Fn(&LocalMesh) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if check(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(CHECK_PERIOD).await;
        }
    }

    /// Wait until every store holds exactly `count` items
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |mesh| mesh.counts().iter().all(|c| *c == count))
            .await
    }

    /// Wait until every store holds `pair` with `value`
    pub async fn wait_for_value(&self, pair: &KeyIdPair, value: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, |mesh| {
            mesh.nodes.iter().all(|n| {
                matches!(n.store.get(pair), Ok(Some(record)) if record.value() == value)
            })
        })
        .await
    }

    /// Text rendering of member `i`'s store
    pub fn dump(&self, i: usize) -> String {
        let node = &self.nodes[i];
        format!("{}:\n{}", node.engine.id(), node.store.dump())
    }

    /// Items held by member `i`, owner then key order
    pub fn snapshot(&self, i: usize) -> Vec<Record> {
        self.nodes[i].store.snapshot().unwrap_or_default()
    }

    /// Owners of every item member `i` holds
    pub fn owners(&self, i: usize) -> Vec<MemberId> {
        let mut owners: Vec<MemberId> = self
            .snapshot(i)
            .iter()
            .map(|r| r.owned_by().clone())
            .collect();
        owners.dedup();
        owners
    }
}
