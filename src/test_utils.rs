//! 测试辅助工具模块
//! Test utilities module

#![cfg(test)]

use crate::{
    connection::{ConnectionContext, FeaturesReply, ProtocolVersion, channel::MpscControlChannel},
    device::DeviceIdentity,
    error::BoxError,
    lifecycle::{ClusterSingletonProvider, LifecycleService, ServiceRegistration},
    subsystem::{SubsystemContext, SubsystemKind},
};
use async_trait::async_trait;
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const TEST_DEVICE_ADDR: &str = "127.0.0.1:6653";

/// Creates a connection that completed its handshake for datapath `dpid`.
pub fn working_connection(dpid: u64) -> ConnectionContext {
    let conn = handshaking_connection();
    conn.complete_handshake(FeaturesReply {
        datapath_id: dpid,
        buffers: 256,
        tables: 254,
        auxiliary_id: 0,
        capabilities: 0x4f,
    })
    .unwrap();
    conn
}

pub fn handshaking_connection() -> ConnectionContext {
    let addr: SocketAddr = TEST_DEVICE_ADDR.parse().unwrap();
    let (channel, _rx) = MpscControlChannel::new(addr, 16);
    ConnectionContext::new(Arc::new(channel), ProtocolVersion::Of13)
}

pub fn device(dpid: u64) -> DeviceIdentity {
    DeviceIdentity::from_datapath_id(dpid)
}

/// A subsystem that records its start/stop calls and can be told to fail.
#[derive(Debug)]
pub struct MockSubsystem {
    kind: SubsystemKind,
    running: AtomicBool,
    ready: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    start_delay_ms: AtomicU64,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockSubsystem {
    pub fn new(kind: SubsystemKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            running: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            start_delay_ms: AtomicU64::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn failing(kind: SubsystemKind) -> Arc<Self> {
        let subsystem = Self::new(kind);
        subsystem.set_fail_start(true);
        subsystem
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.start_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubsystemContext for MockSubsystem {
    fn kind(&self) -> SubsystemKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let delay = self.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(format!("{} refused to start", self.kind).into());
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(format!("{} failed to stop", self.kind).into());
        }
        Ok(())
    }
}

/// A cluster provider that only records registrations; tests drive mastership
/// by calling `grant`/`revoke` from the test task.
#[derive(Default)]
pub struct MockClusterProvider {
    services: Mutex<Vec<(DeviceIdentity, Arc<dyn LifecycleService>)>>,
    closed: Arc<AtomicUsize>,
    fail: AtomicBool,
}

impl MockClusterProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn registered(&self) -> usize {
        self.services.lock().unwrap().len()
    }

    pub fn closed_registrations(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn service_for(&self, device: &DeviceIdentity) -> Arc<dyn LifecycleService> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|(d, _)| d == device)
            .map(|(_, s)| s.clone())
            .expect("no service registered for device")
    }

    pub async fn grant(&self, device: &DeviceIdentity) -> Result<(), BoxError> {
        self.service_for(device).instantiate_service_instance().await
    }

    pub async fn revoke(&self, device: &DeviceIdentity) -> Result<(), BoxError> {
        self.service_for(device).close_service_instance().await
    }
}

struct MockRegistration {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceRegistration for MockRegistration {
    async fn close(&self) -> Result<(), BoxError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ClusterSingletonProvider for MockClusterProvider {
    async fn register_service(
        &self,
        device: &DeviceIdentity,
        service: Arc<dyn LifecycleService>,
    ) -> Result<Box<dyn ServiceRegistration>, BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("cluster unavailable".into());
        }
        self.services
            .lock()
            .unwrap()
            .push((device.clone(), service));
        Ok(Box::new(MockRegistration {
            closed: self.closed.clone(),
        }))
    }
}

/// A named lifecycle service that does nothing.
pub struct NamedService(pub &'static str);

#[async_trait]
impl LifecycleService for NamedService {
    fn name(&self) -> &str {
        self.0
    }

    async fn instantiate_service_instance(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close_service_instance(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
