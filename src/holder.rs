//! 上下文链持有者：按设备标识键控的链存储，并将连接和集群事件转发给链。
//! Context chain holder: the store of chains keyed by device identity, relaying
//! connection and cluster events into chain operations.
//!
//! 链在设备首次连接时创建，在显式移除或自行关闭时销毁。
//!
//! Chains are created on a device's first connection and destroyed on explicit
//! removal or when they close themselves.

use crate::{
    chain::{ChainEvent, ContextChain},
    config::Config,
    connection::{ConnectionContext, ConnectionState},
    device::DeviceIdentity,
    error::{Error, Result},
    lifecycle::{ChainLifecycleService, ClusterSingletonProvider},
    subsystem::{SubsystemContext, SubsystemKind},
};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Creates one subsystem context per device connection.
///
/// 为每个设备连接创建一个子系统上下文。
pub trait SubsystemFactory: Send + Sync + 'static {
    fn kind(&self) -> SubsystemKind;

    fn create(
        &self,
        device: &DeviceIdentity,
        connection: &ConnectionContext,
    ) -> Arc<dyn SubsystemContext>;
}

/// Outcome of a device connection reported to the holder.
///
/// 报告给持有者的设备连接结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A new chain was created for the device.
    /// 为设备创建了新链。
    MayContinue,
    /// The device already had a chain; the new connection replaced the old one.
    /// 设备已有链；新连接替换了旧连接。
    AlreadyConnected,
    /// The holder is at capacity; the connection should be refused.
    /// 持有者已满；应拒绝该连接。
    RefusingNoSpace,
}

enum Slot {
    Existing(ContextChain),
    Created(ContextChain),
}

/// The keyed store of context chains, one per device.
///
/// 上下文链的键控存储，每个设备一条。
pub struct ContextChainHolder {
    config: Config,
    chains: Arc<DashMap<DeviceIdentity, ContextChain>>,
    admission: Mutex<()>,
    factories: Vec<Arc<dyn SubsystemFactory>>,
    provider: Arc<dyn ClusterSingletonProvider>,
}

impl std::fmt::Debug for ContextChainHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextChainHolder")
            .field("config", &self.config)
            .field("chains", &self.chains.len())
            .field(
                "factories",
                &self.factories.iter().map(|f| f.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ContextChainHolder {
    pub fn new(config: Config, provider: Arc<dyn ClusterSingletonProvider>) -> Self {
        Self {
            config,
            chains: Arc::new(DashMap::new()),
            admission: Mutex::new(()),
            factories: Vec::new(),
            provider,
        }
    }

    /// Adds a factory whose subsystem is registered into every new chain.
    /// 添加一个工厂，其子系统会注册到每条新链中。
    pub fn add_subsystem_factory(&mut self, factory: Arc<dyn SubsystemFactory>) {
        self.factories.push(factory);
    }

    pub fn get(&self, device: &DeviceIdentity) -> Option<ContextChain> {
        self.chains.get(device).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn devices(&self) -> Vec<DeviceIdentity> {
        self.chains.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handles a handshake-complete connection. Creates the device's chain on
    /// first connect; otherwise the newest connection replaces the chain's
    /// primary connection.
    ///
    /// Once the new connection has been installed the call reports
    /// `AlreadyConnected` even if the chain could not resume its role, so the
    /// caller keeps the connection open. An `Err` means the connection was not
    /// taken and may be closed.
    ///
    /// 处理已完成握手的连接。首次连接时创建设备的链；否则最新的连接替换链的主连接。
    ///
    /// 一旦新连接已安装，即使链无法恢复其角色，调用也会报告 `AlreadyConnected`，
    /// 因此调用方应保持连接打开。`Err` 表示连接未被接收，可以关闭。
    pub async fn device_connected(&self, connection: ConnectionContext) -> Result<ConnectionStatus> {
        let device = match connection.state() {
            ConnectionState::Handshaking => return Err(Error::HandshakeIncomplete),
            ConnectionState::Dropped | ConnectionState::Closed => return Err(Error::NotConnected),
            ConnectionState::Working => connection
                .device_identity()
                .ok_or(Error::HandshakeIncomplete)?,
        };

        loop {
            let Some(slot) = self.admit(&device, &connection)? else {
                return Ok(ConnectionStatus::RefusingNoSpace);
            };

            match slot {
                Slot::Created(chain) => {
                    if let Err(e) = self.initialize_chain(&chain, &connection).await {
                        warn!(%device, error = %e, "Failed to initialize context chain, destroying it");
                        self.chains
                            .remove_if(&device, |_, existing| existing.id() == chain.id());
                        let _ = chain.close().await;
                        return Err(e);
                    }
                    info!(%device, chain = %chain.id(), "Context chain created");
                    return Ok(ConnectionStatus::MayContinue);
                }
                Slot::Existing(chain) => match chain.change_primary_connection(connection.clone()).await {
                    Ok(()) => {
                        info!(%device, connection = %connection.id(), "Device reconnected, primary connection replaced");
                        return Ok(ConnectionStatus::AlreadyConnected);
                    }
                    Err(e) if e.is_closed() => {
                        // The old chain closed under us; drop its entry and create a fresh one.
                        debug!(%device, chain = %chain.id(), "Existing chain already closed, recreating");
                        self.chains
                            .remove_if(&device, |_, existing| existing.id() == chain.id());
                    }
                    Err(e) => {
                        // A failed resume still leaves the new connection as the chain's primary.
                        // 恢复失败时，新连接仍是链的主连接。
                        let committed = chain
                            .primary_connection()
                            .await
                            .is_some_and(|primary| primary.id() == connection.id());
                        if committed {
                            warn!(%device, connection = %connection.id(), error = %e, "Device reconnected but its role could not be resumed");
                            return Ok(ConnectionStatus::AlreadyConnected);
                        }
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Finds the device's chain or spawns one if there is room. `None` means
    /// the holder is full. Admission is serialized so concurrent connects of new
    /// devices cannot overshoot `max_devices`.
    ///
    /// 查找设备的链，如有空间则生成一条。`None` 表示持有者已满。准入是串行的，
    /// 因此新设备的并发连接不会超出 `max_devices`。
    fn admit(&self, device: &DeviceIdentity, connection: &ConnectionContext) -> Result<Option<Slot>> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

        // Checked before taking the entry: `len` locks every shard.
        if !self.chains.contains_key(device) {
            if let Some(max) = self.config.holder.max_devices {
                if self.chains.len() >= max {
                    warn!(%device, max, "Chain holder is full, refusing connection");
                    return Ok(None);
                }
            }
        }

        let slot = match self.chains.entry(device.clone()) {
            Entry::Occupied(entry) => Slot::Existing(entry.get().clone()),
            Entry::Vacant(entry) => {
                let chain = ContextChain::spawn_with_connection(
                    connection.clone(),
                    self.config.chain.clone(),
                )?;
                entry.insert(chain.clone());
                Slot::Created(chain)
            }
        };
        Ok(Some(slot))
    }

    async fn initialize_chain(&self, chain: &ContextChain, connection: &ConnectionContext) -> Result<()> {
        let chains = Arc::downgrade(&self.chains);
        let chain_id = chain.id();
        let device = chain.device().clone();
        chain
            .register_event_listener(Box::new(move |event| {
                if matches!(event, ChainEvent::Closed) {
                    if let Some(chains) = chains.upgrade() {
                        chains.remove_if(&device, |_, existing| existing.id() == chain_id);
                    }
                }
            }))
            .await?;

        for factory in &self.factories {
            chain
                .add_context(factory.create(chain.device(), connection))
                .await?;
        }
        chain
            .add_lifecycle_service(Arc::new(ChainLifecycleService::new(chain)))
            .await?;
        chain.register_services(self.provider.clone()).await?;
        Ok(())
    }

    /// Handles the loss of `connection`. The chain goes to sleep if it was the
    /// primary connection; a superseded connection is just released.
    ///
    /// 处理 `connection` 的丢失。如果它是主连接，链会进入休眠；已被取代的连接只会被释放。
    pub async fn device_disconnected(&self, connection: &ConnectionContext) -> Result<()> {
        let chain = connection
            .device_identity()
            .and_then(|device| self.get(&device));
        let Some(chain) = chain else {
            debug!(connection = %connection.id(), "Disconnected connection has no chain");
            connection.close().await;
            return Ok(());
        };

        match chain.connection_lost(connection).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                connection.close().await;
                Ok(())
            }
            Err(e) if e.is_closed() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn chain_for(&self, device: &DeviceIdentity) -> Result<ContextChain> {
        self.get(device)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))
    }

    /// The cluster elected this node master of `device`.
    /// 集群选举本节点为 `device` 的主节点。
    pub async fn on_master_role_acquired(&self, device: &DeviceIdentity) -> Result<()> {
        let chain = self.chain_for(device)?;
        if let Err(e) = chain.start_chain().await {
            warn!(%device, error = %e, "Could not start mastership");
            return Err(e);
        }
        Ok(())
    }

    /// The cluster made this node a slave for `device`.
    /// 集群使本节点成为 `device` 的从节点。
    pub async fn on_slave_role_acquired(&self, device: &DeviceIdentity) -> Result<()> {
        self.chain_for(device)?.make_device_slave().await
    }

    /// Mastership could not be started; the chain is destroyed so the device can
    /// be driven from elsewhere.
    ///
    /// 无法启动主控权；链被销毁，以便设备可以由其他节点驱动。
    pub async fn on_not_able_to_start_mastership(&self, device: &DeviceIdentity, reason: &str) -> Result<()> {
        warn!(%device, reason, "Not able to start mastership, destroying chain");
        self.destroy_context_chain(device).await
    }

    /// Removes the device's chain and closes it.
    /// 移除设备的链并关闭它。
    pub async fn destroy_context_chain(&self, device: &DeviceIdentity) -> Result<()> {
        let Some((_, chain)) = self.chains.remove(device) else {
            return Err(Error::UnknownDevice(device.to_string()));
        };
        match chain.close().await {
            Err(e) if e.is_closed() => Ok(()),
            other => other,
        }
    }

    /// Closes every chain concurrently and empties the store.
    /// 并发关闭所有链并清空存储。
    pub async fn close(&self) {
        let chains: Vec<ContextChain> = self
            .chains
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.chains.clear();

        let mut closing = JoinSet::new();
        for chain in chains {
            closing.spawn(async move {
                let device = chain.device().clone();
                (device, chain.close().await)
            });
        }
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((device, Err(e))) if !e.is_closed() => {
                    warn!(%device, error = %e, "Failed to close chain");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Chain close task failed"),
            }
        }
        info!("Context chain holder closed");
    }
}
