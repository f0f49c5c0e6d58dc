//! Cluster-facing lifecycle services: the seam through which the clustering
//! collaborator grants and revokes mastership of a device.
//!
//! 面向集群的生命周期服务：集群协作者授予和撤销设备主控权的接口。

use crate::{
    chain::{ContextChain, WeakContextChain},
    device::DeviceIdentity,
    error::BoxError,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// A hook the cluster invokes when this node gains or loses mastership of a device.
///
/// 当本节点获得或失去设备主控权时集群调用的钩子。
#[async_trait]
pub trait LifecycleService: Send + Sync + 'static {
    /// Unique name of the service within its chain.
    fn name(&self) -> &str;

    /// This node was elected master.
    /// 本节点当选为主节点。
    async fn instantiate_service_instance(&self) -> Result<(), BoxError>;

    /// Mastership was revoked from this node.
    /// 本节点的主控权被撤销。
    async fn close_service_instance(&self) -> Result<(), BoxError>;
}

/// A live registration of one lifecycle service with the cluster.
///
/// 一个生命周期服务在集群中的活动注册。
#[async_trait]
pub trait ServiceRegistration: Send + Sync {
    /// Withdraws the service from the cluster.
    async fn close(&self) -> Result<(), BoxError>;
}

/// The clustering collaborator that elects a single master per device.
///
/// Implementations must invoke service callbacks from their own tasks, never
/// from inside `register_service` or `ServiceRegistration::close`: those are
/// called from the chain's actor, which is busy until they return.
///
/// 为每个设备选举单一主节点的集群协作者。
///
/// 实现必须在自己的任务中调用服务回调，绝不能在 `register_service` 或
/// `ServiceRegistration::close` 内部调用：它们由链的 actor 调用，该 actor 在它们返回之前一直处于忙碌状态。
#[async_trait]
pub trait ClusterSingletonProvider: Send + Sync + 'static {
    async fn register_service(
        &self,
        device: &DeviceIdentity,
        service: Arc<dyn LifecycleService>,
    ) -> Result<Box<dyn ServiceRegistration>, BoxError>;
}

/// The lifecycle service that relays mastership decisions into its chain:
/// a grant starts the chain, a revocation demotes it to slave.
///
/// It holds only a weak handle, so a registered service never keeps a closed
/// chain's actor alive.
///
/// 将主控权决定转发到其链的生命周期服务：授予时启动链，撤销时将其降级为从节点。
///
/// 它只持有弱句柄，因此已注册的服务永远不会使已关闭链的 actor 保持存活。
#[derive(Debug)]
pub struct ChainLifecycleService {
    name: String,
    chain: WeakContextChain,
}

impl ChainLifecycleService {
    pub fn new(chain: &ContextChain) -> Self {
        Self {
            name: format!("{}-lifecycle", chain.device()),
            chain: chain.downgrade(),
        }
    }
}

#[async_trait]
impl LifecycleService for ChainLifecycleService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn instantiate_service_instance(&self) -> Result<(), BoxError> {
        let chain = self
            .chain
            .upgrade()
            .ok_or(crate::error::Error::ChainClosed)?;
        info!(device = %chain.device(), "Mastership granted");
        chain.start_chain().await?;
        Ok(())
    }

    async fn close_service_instance(&self) -> Result<(), BoxError> {
        let Some(chain) = self.chain.upgrade() else {
            debug!(device = %self.chain.device(), "Mastership revoked for a released chain");
            return Ok(());
        };
        info!(device = %chain.device(), "Mastership revoked");
        match chain.make_device_slave().await {
            Err(e) if e.is_closed() => Ok(()),
            other => other.map_err(Into::into),
        }
    }
}
