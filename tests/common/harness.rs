//! tests/common/harness.rs
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use context_chain::{
    ClusterSingletonProvider, ConnectionContext, ContextChain, ContextChainState, DeviceIdentity,
    LifecycleService, ServiceRegistration, SubsystemContext, SubsystemFactory, SubsystemKind,
    connection::{FeaturesReply, ProtocolVersion, channel::MpscControlChannel},
    error::BoxError,
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "context_chain=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

// Each simulated switch gets its own port so logs are easy to follow.
static NEXT_SWITCH_PORT: AtomicU64 = AtomicU64::new(50000);

/// A switch that finished its handshake, together with the receiving end of its
/// control channel. The receiver yields `None` once the controller closed it.
pub fn connect_switch(datapath_id: u64) -> (ConnectionContext, mpsc::Receiver<Bytes>) {
    let port = NEXT_SWITCH_PORT.fetch_add(1, Ordering::SeqCst);
    let addr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (channel, rx) = MpscControlChannel::new(addr, 32);
    let connection = ConnectionContext::new(Arc::new(channel), ProtocolVersion::Of13);
    connection
        .complete_handshake(FeaturesReply {
            datapath_id,
            buffers: 256,
            tables: 254,
            auxiliary_id: 0,
            capabilities: 0x4f,
        })
        .unwrap();
    (connection, rx)
}

/// Waits (bounded) until the chain reaches `state`.
pub async fn wait_for_state(chain: &ContextChain, state: ContextChainState) {
    let mut rx = chain.subscribe_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("chain never reached {state}, stuck in {}", chain.state()))
        .unwrap();
}

/// A subsystem that only tracks whether it is running.
pub struct TrackedSubsystem {
    kind: SubsystemKind,
    running: AtomicBool,
}

impl TrackedSubsystem {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubsystemContext for TrackedSubsystem {
    fn kind(&self) -> SubsystemKind {
        self.kind
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates tracked subsystems and remembers them per device.
pub struct TrackedFactory {
    kind: SubsystemKind,
    created: Mutex<HashMap<DeviceIdentity, Arc<TrackedSubsystem>>>,
}

impl TrackedFactory {
    pub fn new(kind: SubsystemKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            created: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_running(&self, device: &DeviceIdentity) -> bool {
        self.created
            .lock()
            .unwrap()
            .get(device)
            .is_some_and(|s| s.is_running())
    }
}

impl SubsystemFactory for TrackedFactory {
    fn kind(&self) -> SubsystemKind {
        self.kind
    }

    fn create(&self, device: &DeviceIdentity, _connection: &ConnectionContext) -> Arc<dyn SubsystemContext> {
        let subsystem = Arc::new(TrackedSubsystem {
            kind: self.kind,
            running: AtomicBool::new(false),
        });
        self.created
            .lock()
            .unwrap()
            .insert(device.clone(), subsystem.clone());
        subsystem
    }
}

struct Candidate {
    registration_id: u64,
    node: &'static str,
    service: Arc<dyn LifecycleService>,
}

#[derive(Default)]
struct Election {
    next_id: u64,
    candidates: HashMap<DeviceIdentity, Vec<Candidate>>,
}

/// A cluster that elects the earliest registered node as master of a device and
/// makes every later one a slave. When the master withdraws, the next candidate
/// is promoted. Callbacks run on spawned tasks, like a real cluster's do.
#[derive(Clone, Default)]
pub struct SimulatedCluster {
    election: Arc<Mutex<Election>>,
    grants: Arc<AtomicUsize>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The provider one controller node uses to join the election.
    pub fn node(&self, name: &'static str) -> Arc<dyn ClusterSingletonProvider> {
        Arc::new(ClusterNode {
            name,
            cluster: self.clone(),
        })
    }

    pub fn master_of(&self, device: &DeviceIdentity) -> Option<&'static str> {
        self.election
            .lock()
            .unwrap()
            .candidates
            .get(device)
            .and_then(|c| c.first())
            .map(|c| c.node)
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }

    fn grant(&self, service: Arc<dyn LifecycleService>) {
        self.grants.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = service.instantiate_service_instance().await {
                tracing::warn!(service = service.name(), error = %e, "Grant rejected");
            }
        });
    }

    fn revoke(&self, service: Arc<dyn LifecycleService>) {
        tokio::spawn(async move {
            let _ = service.close_service_instance().await;
        });
    }

    fn withdraw(&self, device: &DeviceIdentity, registration_id: u64) {
        let promoted = {
            let mut election = self.election.lock().unwrap();
            let Some(candidates) = election.candidates.get_mut(device) else {
                return;
            };
            let was_master = candidates
                .first()
                .is_some_and(|c| c.registration_id == registration_id);
            candidates.retain(|c| c.registration_id != registration_id);
            if was_master {
                candidates.first().map(|c| c.service.clone())
            } else {
                None
            }
        };
        if let Some(service) = promoted {
            self.grant(service);
        }
    }
}

struct ClusterNode {
    name: &'static str,
    cluster: SimulatedCluster,
}

#[async_trait]
impl ClusterSingletonProvider for ClusterNode {
    async fn register_service(
        &self,
        device: &DeviceIdentity,
        service: Arc<dyn LifecycleService>,
    ) -> Result<Box<dyn ServiceRegistration>, BoxError> {
        let (registration_id, is_master) = {
            let mut election = self.cluster.election.lock().unwrap();
            election.next_id += 1;
            let registration_id = election.next_id;
            let candidates = election.candidates.entry(device.clone()).or_default();
            candidates.push(Candidate {
                registration_id,
                node: self.name,
                service: service.clone(),
            });
            (registration_id, candidates.len() == 1)
        };
        if is_master {
            self.cluster.grant(service);
        } else {
            self.cluster.revoke(service);
        }
        Ok(Box::new(ClusterRegistration {
            device: device.clone(),
            registration_id,
            cluster: self.cluster.clone(),
        }))
    }
}

struct ClusterRegistration {
    device: DeviceIdentity,
    registration_id: u64,
    cluster: SimulatedCluster,
}

#[async_trait]
impl ServiceRegistration for ClusterRegistration {
    async fn close(&self) -> Result<(), BoxError> {
        self.cluster.withdraw(&self.device, self.registration_id);
        Ok(())
    }
}
