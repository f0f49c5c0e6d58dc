//! The user-facing handle to a context chain actor.

use super::{
    actor::ChainActor,
    command::ChainCommand,
    state::ContextChainState,
    transitions::{EventListener, StateTransitionExecutor},
};
use crate::{
    config::ChainConfig,
    connection::{ConnectionContext, ConnectionState},
    device::DeviceIdentity,
    error::{Error, Result},
    lifecycle::{ClusterSingletonProvider, LifecycleService},
    subsystem::{SubsystemContext, SubsystemKind, SubsystemRegistry},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one chain instance. A device that gets a new chain
/// after its old one closed gets a new id.
///
/// 链实例的进程内唯一标识。设备在旧链关闭后获得的新链拥有新的标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

/// A handle to the context chain of one device.
///
/// Handles are cheap to clone. Every operation is forwarded to the chain's
/// actor task and applied in the order issued; once the chain is closed every
/// operation fails with [`Error::ChainClosed`].
///
/// 一个设备上下文链的句柄。
///
/// 句柄克隆成本低。每个操作都会转发给链的 actor 任务并按发出顺序应用；
/// 链关闭后每个操作都会以 [`Error::ChainClosed`] 失败。
#[derive(Clone)]
pub struct ContextChain {
    id: ChainId,
    device: DeviceIdentity,
    command_tx: mpsc::Sender<ChainCommand>,
    state_rx: watch::Receiver<ContextChainState>,
}

impl fmt::Debug for ContextChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextChain")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("state", &self.state())
            .finish()
    }
}

impl ContextChain {
    /// Spawns a chain for `device` with no connection yet. Must be called within a tokio runtime.
    ///
    /// 为 `device` 生成一条尚无连接的链。必须在 tokio 运行时中调用。
    pub fn spawn(device: DeviceIdentity, config: ChainConfig) -> Self {
        Self::spawn_inner(device, None, config)
    }

    /// Spawns a chain owning `connection` as its primary connection. The
    /// connection must have completed its handshake.
    ///
    /// 生成一条以 `connection` 作为主连接的链。该连接必须已完成握手。
    pub fn spawn_with_connection(connection: ConnectionContext, config: ChainConfig) -> Result<Self> {
        let device = match connection.state() {
            ConnectionState::Handshaking => return Err(Error::HandshakeIncomplete),
            ConnectionState::Dropped | ConnectionState::Closed => return Err(Error::NotConnected),
            ConnectionState::Working => connection
                .device_identity()
                .ok_or(Error::HandshakeIncomplete)?,
        };
        Ok(Self::spawn_inner(device, Some(connection), config))
    }

    fn spawn_inner(
        device: DeviceIdentity,
        connection: Option<ConnectionContext>,
        config: ChainConfig,
    ) -> Self {
        let id = ChainId(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed));
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let (executor, state_rx) = StateTransitionExecutor::new(device.clone());
        let registry = SubsystemRegistry::new(
            config.required_subsystems.clone(),
            config.subsystem_start_timeout,
            config.subsystem_stop_timeout,
        );

        info!(%device, chain = %id, connected = connection.is_some(), "Spawning context chain");

        let actor = ChainActor {
            device: device.clone(),
            config: Arc::new(config),
            executor,
            registry,
            ever_connected: connection.is_some(),
            primary: connection,
            resume_state: ContextChainState::Undefined,
            services: Vec::new(),
            registrations: HashMap::new(),
            dormant_deadline: None,
            command_rx,
        };
        tokio::spawn(actor.run());

        Self {
            id,
            device,
            command_tx,
            state_rx,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChainCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::ChainClosed)?;
        response_rx.await.map_err(|_| Error::ChainClosed)
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// The chain's current state, readable without waiting on the actor.
    ///
    /// 链的当前状态，无需等待 actor 即可读取。
    pub fn state(&self) -> ContextChainState {
        *self.state_rx.borrow()
    }

    /// Subscribes to state changes.
    /// 订阅状态变化。
    pub fn subscribe_state(&self) -> watch::Receiver<ContextChainState> {
        self.state_rx.clone()
    }

    /// Waits until the chain reaches `Closed`.
    /// 等待链到达 `Closed`。
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx
            .wait_for(|state| *state == ContextChainState::Closed)
            .await;
    }

    pub fn downgrade(&self) -> WeakContextChain {
        WeakContextChain {
            id: self.id,
            device: self.device.clone(),
            command_tx: self.command_tx.downgrade(),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Registers a subsystem context under its kind. Returns `false` when that
    /// slot was already taken; the duplicate is ignored.
    ///
    /// 在其种类下注册子系统上下文。当槽位已被占用时返回 `false`，重复项被忽略。
    pub async fn add_context(&self, context: Arc<dyn SubsystemContext>) -> Result<bool> {
        self.request(|response_tx| ChainCommand::AddContext {
            context,
            response_tx,
        })
        .await?
    }

    /// Adds a lifecycle service to be bound by the next `register_services`.
    /// Services are keyed by name; returns `false` for a duplicate.
    ///
    /// 添加一个生命周期服务，由下一次 `register_services` 绑定。服务以名称为键；重复时返回 `false`。
    pub async fn add_lifecycle_service(&self, service: Arc<dyn LifecycleService>) -> Result<bool> {
        self.request(|response_tx| ChainCommand::AddLifecycleService {
            service,
            response_tx,
        })
        .await
    }

    /// True iff every required subsystem slot is filled. Always `false` once closed.
    ///
    /// 当且仅当每个必需子系统槽位都已填充时为真。关闭后始终为 `false`。
    pub async fn is_ready(&self) -> bool {
        self.request(|response_tx| ChainCommand::IsReady { response_tx })
            .await
            .unwrap_or(false)
    }

    /// Starts every subsystem and makes this node the device's master. All or
    /// nothing: on any failure the subsystems started so far are stopped again.
    ///
    /// 启动每个子系统并使本节点成为设备的主节点。全有或全无：任何失败时，已启动的子系统会被再次停止。
    pub async fn start_chain(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::StartChain { response_tx })
            .await?
    }

    /// Stops the working subsystems but keeps them registered.
    /// 停止工作中的子系统，但保留它们的注册。
    pub async fn stop_chain(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::StopChain { response_tx })
            .await?
    }

    /// Demotes the chain to standby, keeping the connection and subsystems.
    /// 将链降级为备用，保留连接和子系统。
    pub async fn make_device_slave(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::MakeDeviceSlave { response_tx })
            .await?
    }

    /// Installs `connection` as the primary connection and releases the old one.
    /// Mastership is unchanged, except that a sleeping chain resumes its role.
    ///
    /// 将 `connection` 安装为主连接并释放旧连接。主从角色不变，但休眠的链会恢复其角色。
    pub async fn change_primary_connection(&self, connection: ConnectionContext) -> Result<()> {
        self.request(|response_tx| ChainCommand::ChangePrimaryConnection {
            connection,
            response_tx,
        })
        .await?
    }

    /// Reacts to the loss of the primary connection. Completes once master
    /// activity has been suspended; fails if no connection was ever registered.
    ///
    /// 响应主连接丢失。在主节点活动暂停后完成；如果从未注册过连接则失败。
    pub async fn connection_dropped(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::ConnectionDropped { response_tx })
            .await?
    }

    /// Puts the chain to sleep and releases its connection. The chain wakes up on
    /// `change_primary_connection` or closes itself after the configured sleep timeout.
    ///
    /// 使链进入休眠并释放其连接。链在 `change_primary_connection` 时唤醒，或在配置的休眠超时后自行关闭。
    pub async fn sleep_the_chain_and_drop_connection(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::SleepAndDropConnection { response_tx })
            .await?
    }

    /// Reports the loss of `connection`. If it is still the primary connection
    /// the chain reacts and goes to sleep; a superseded connection is ignored.
    /// Returns whether the chain reacted.
    ///
    /// 报告 `connection` 丢失。如果它仍是主连接，链会响应并进入休眠；已被取代的连接被忽略。
    /// 返回链是否做出了响应。
    pub async fn connection_lost(&self, connection: &ConnectionContext) -> Result<bool> {
        let connection_id = connection.id();
        self.request(|response_tx| ChainCommand::ConnectionLost {
            connection_id,
            response_tx,
        })
        .await?
    }

    /// Binds every not yet registered lifecycle service to the cluster. Returns
    /// how many services were newly registered.
    ///
    /// 将每个尚未注册的生命周期服务绑定到集群。返回新注册的服务数量。
    pub async fn register_services(&self, provider: Arc<dyn ClusterSingletonProvider>) -> Result<usize> {
        self.request(|response_tx| ChainCommand::RegisterServices {
            provider,
            response_tx,
        })
        .await?
    }

    pub async fn primary_connection(&self) -> Option<ConnectionContext> {
        self.request(|response_tx| ChainCommand::PrimaryConnection { response_tx })
            .await
            .ok()
            .flatten()
    }

    /// Subsystems currently running master activity.
    /// 当前正在运行主节点活动的子系统。
    pub async fn started_subsystems(&self) -> Vec<SubsystemKind> {
        self.request(|response_tx| ChainCommand::StartedSubsystems { response_tx })
            .await
            .unwrap_or_default()
    }

    pub async fn registered_subsystems(&self) -> Vec<SubsystemKind> {
        self.request(|response_tx| ChainCommand::RegisteredSubsystems { response_tx })
            .await
            .unwrap_or_default()
    }

    pub async fn register_event_listener(&self, listener: EventListener) -> Result<()> {
        self.command_tx
            .send(ChainCommand::RegisterEventListener { listener })
            .await
            .map_err(|_| Error::ChainClosed)
    }

    /// Closes the chain. Terminal: a second close fails with [`Error::ChainClosed`].
    ///
    /// 关闭链。终止操作：第二次关闭以 [`Error::ChainClosed`] 失败。
    pub async fn close(&self) -> Result<()> {
        self.request(|response_tx| ChainCommand::Close { response_tx })
            .await?
    }
}

/// A handle that does not keep the chain alive.
///
/// 不会使链保持存活的句柄。
#[derive(Clone)]
pub struct WeakContextChain {
    id: ChainId,
    device: DeviceIdentity,
    command_tx: mpsc::WeakSender<ChainCommand>,
    state_rx: watch::Receiver<ContextChainState>,
}

impl fmt::Debug for WeakContextChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakContextChain")
            .field("id", &self.id)
            .field("device", &self.device)
            .finish()
    }
}

impl WeakContextChain {
    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn upgrade(&self) -> Option<ContextChain> {
        self.command_tx.upgrade().map(|command_tx| ContextChain {
            id: self.id,
            device: self.device.clone(),
            command_tx,
            state_rx: self.state_rx.clone(),
        })
    }
}
