//! The actor that owns one device's chain state.
//!
//! 拥有一个设备链状态的 actor。

use super::{
    command::ChainCommand,
    state::ContextChainState,
    transitions::{ChainEvent, StateTransitionExecutor},
    validation::StateValidator,
};
use crate::{
    config::ChainConfig,
    connection::{ConnectionContext, ConnectionId, ConnectionState},
    device::DeviceIdentity,
    error::{Error, Result},
    lifecycle::{ClusterSingletonProvider, LifecycleService, ServiceRegistration},
    subsystem::{SubsystemContext, SubsystemRegistry},
};
use std::{collections::HashMap, ops::ControlFlow, pin::Pin, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{Sleep, sleep},
};
use tracing::{debug, error, info, warn};

/// The actor that owns the chain's connection, subsystem registry and state.
///
/// It runs in a dedicated task and processes `ChainCommand`s one at a time, so
/// role transitions never interleave. Long-running subsystem work is awaited
/// inside the command that triggered it; a `Close` queued behind a `StartChain`
/// therefore only runs once the start has settled.
///
/// 拥有链的连接、子系统注册表和状态的 actor。
///
/// 它在专用任务中运行，一次处理一个 `ChainCommand`，因此角色转换永不交错。
/// 长时间运行的子系统工作在触发它的命令内部等待；排在 `StartChain` 之后的 `Close`
/// 只会在启动完成（成功或回滚）后运行。
pub(crate) struct ChainActor {
    pub(crate) device: DeviceIdentity,
    pub(crate) config: Arc<ChainConfig>,
    pub(crate) executor: StateTransitionExecutor,
    pub(crate) registry: SubsystemRegistry,
    pub(crate) primary: Option<ConnectionContext>,
    /// Set once any connection has been installed.
    pub(crate) ever_connected: bool,
    /// The state a sleeping chain returns to when a connection arrives.
    /// 休眠链在连接到达时返回的状态。
    pub(crate) resume_state: ContextChainState,
    pub(crate) services: Vec<Arc<dyn LifecycleService>>,
    pub(crate) registrations: HashMap<String, Box<dyn ServiceRegistration>>,
    /// Armed while sleeping without a connection.
    pub(crate) dormant_deadline: Option<Pin<Box<Sleep>>>,
    pub(crate) command_rx: mpsc::Receiver<ChainCommand>,
}

impl ChainActor {
    /// Runs the actor's main event loop until the chain is closed.
    ///
    /// 运行 actor 的主事件循环，直到链关闭。
    pub(crate) async fn run(mut self) {
        info!(device = %self.device, "Context chain actor running");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        debug!(device = %self.device, "All chain handles dropped, shutting down");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                _ = wait_deadline(&mut self.dormant_deadline), if self.dormant_deadline.is_some() => {
                    info!(
                        device = %self.device,
                        timeout = ?self.config.sleep_timeout,
                        "No replacement connection arrived, closing dormant chain"
                    );
                    self.shutdown().await;
                    break;
                }
            }
        }

        debug!(device = %self.device, "Context chain actor stopped");
    }

    fn state(&self) -> ContextChainState {
        self.executor.current()
    }

    async fn handle_command(&mut self, command: ChainCommand) -> ControlFlow<()> {
        debug!(
            device = %self.device,
            command = command.name(),
            state = %self.state(),
            "Handling chain command"
        );

        match command {
            ChainCommand::AddContext {
                context,
                response_tx,
            } => {
                let _ = response_tx.send(self.add_context(context).await);
            }
            ChainCommand::AddLifecycleService {
                service,
                response_tx,
            } => {
                let _ = response_tx.send(self.add_lifecycle_service(service));
            }
            ChainCommand::IsReady { response_tx } => {
                let _ = response_tx.send(self.registry.is_ready());
            }
            ChainCommand::StartChain { response_tx } => {
                let _ = response_tx.send(self.start_chain().await);
            }
            ChainCommand::StopChain { response_tx } => {
                let _ = response_tx.send(self.stop_chain().await);
            }
            ChainCommand::MakeDeviceSlave { response_tx } => {
                let _ = response_tx.send(self.make_device_slave().await);
            }
            ChainCommand::ChangePrimaryConnection {
                connection,
                response_tx,
            } => {
                let _ = response_tx.send(self.change_primary_connection(connection).await);
            }
            ChainCommand::ConnectionDropped { response_tx } => {
                let _ = response_tx.send(self.connection_dropped().await);
            }
            ChainCommand::SleepAndDropConnection { response_tx } => {
                let _ = response_tx.send(self.sleep_the_chain_and_drop_connection().await);
            }
            ChainCommand::ConnectionLost {
                connection_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.connection_lost(connection_id).await);
            }
            ChainCommand::RegisterServices {
                provider,
                response_tx,
            } => {
                let _ = response_tx.send(self.register_services(provider).await);
            }
            ChainCommand::PrimaryConnection { response_tx } => {
                let _ = response_tx.send(self.primary.clone());
            }
            ChainCommand::StartedSubsystems { response_tx } => {
                let _ = response_tx.send(self.registry.started());
            }
            ChainCommand::RegisteredSubsystems { response_tx } => {
                let _ = response_tx.send(self.registry.kinds());
            }
            ChainCommand::RegisterEventListener { listener } => {
                self.executor.register_event_listener(listener);
            }
            ChainCommand::Close { response_tx } => {
                self.shutdown().await;
                let _ = response_tx.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn add_context(&mut self, context: Arc<dyn SubsystemContext>) -> Result<bool> {
        let kind = context.kind();
        if !self.registry.insert(context) {
            debug!(device = %self.device, %kind, "Subsystem already registered, ignoring");
            return Ok(false);
        }
        self.executor.trigger_event(ChainEvent::ContextAdded(kind));

        match self.state() {
            ContextChainState::Undefined => {
                self.executor
                    .transition_to(ContextChainState::Initialization)?;
            }
            ContextChainState::Sleeping if self.resume_state == ContextChainState::Undefined => {
                self.resume_state = ContextChainState::Initialization;
            }
            ContextChainState::WorkingMaster => {
                // A late subsystem joins a running master. If it cannot start,
                // the whole chain is rolled back rather than left half-started.
                if let Err(e) = self.registry.start_all().await {
                    error!(device = %self.device, %kind, error = %e, "Late subsystem failed to start, master stopped");
                    self.executor
                        .transition_to(ContextChainState::Initialization)?;
                    return Err(e);
                }
            }
            _ => {}
        }
        Ok(true)
    }

    fn add_lifecycle_service(&mut self, service: Arc<dyn LifecycleService>) -> bool {
        if self.services.iter().any(|s| s.name() == service.name()) {
            debug!(device = %self.device, service = service.name(), "Lifecycle service already added");
            return false;
        }
        self.services.push(service);
        true
    }

    fn require_connection(&self) -> Result<()> {
        match &self.primary {
            Some(connection) if connection.is_working() => Ok(()),
            Some(_) => Err(Error::NotConnected),
            None if self.ever_connected => Err(Error::ConnectionDropped),
            None => Err(Error::NoConnection),
        }
    }

    async fn start_chain(&mut self) -> Result<()> {
        let current = self.state();
        match current {
            ContextChainState::WorkingMaster => return Ok(()),
            ContextChainState::Sleeping => return Err(Error::ConnectionDropped),
            _ => {}
        }

        if !self.registry.is_ready() {
            let missing = self.registry.missing();
            warn!(device = %self.device, ?missing, "Chain is not ready to start");
            return Err(Error::NotReady { missing });
        }
        if !StateValidator::is_valid_transition(current, ContextChainState::WorkingMaster) {
            return Err(Error::InvalidTransition {
                from: current,
                to: ContextChainState::WorkingMaster,
            });
        }
        self.require_connection()?;

        if let Err(e) = self.registry.start_all().await {
            error!(device = %self.device, error = %e, "Failed to start chain, subsystems rolled back");
            return Err(e);
        }
        self.executor.transition_to(ContextChainState::WorkingMaster)
    }

    async fn stop_chain(&mut self) -> Result<()> {
        match self.state() {
            ContextChainState::Undefined | ContextChainState::Initialization => Ok(()),
            ContextChainState::Sleeping => {
                if self.resume_state != ContextChainState::Undefined {
                    self.resume_state = ContextChainState::Initialization;
                }
                Ok(())
            }
            ContextChainState::WorkingMaster => {
                self.registry.stop_all().await;
                self.executor
                    .transition_to(ContextChainState::Initialization)
            }
            ContextChainState::WorkingSlave => self
                .executor
                .transition_to(ContextChainState::Initialization),
            ContextChainState::Closed => Err(Error::ChainClosed),
        }
    }

    async fn make_device_slave(&mut self) -> Result<()> {
        match self.state() {
            ContextChainState::WorkingSlave => Ok(()),
            ContextChainState::WorkingMaster => {
                self.registry.stop_all().await;
                self.executor.transition_to(ContextChainState::WorkingSlave)
            }
            ContextChainState::Initialization => {
                self.require_connection()?;
                self.executor.transition_to(ContextChainState::WorkingSlave)
            }
            ContextChainState::Sleeping => {
                if self.resume_state == ContextChainState::Undefined {
                    return Err(Error::InvalidTransition {
                        from: ContextChainState::Undefined,
                        to: ContextChainState::WorkingSlave,
                    });
                }
                self.resume_state = ContextChainState::WorkingSlave;
                Ok(())
            }
            ContextChainState::Undefined => Err(Error::InvalidTransition {
                from: ContextChainState::Undefined,
                to: ContextChainState::WorkingSlave,
            }),
            ContextChainState::Closed => Err(Error::ChainClosed),
        }
    }

    async fn change_primary_connection(&mut self, connection: ConnectionContext) -> Result<()> {
        match connection.state() {
            ConnectionState::Handshaking => return Err(Error::HandshakeIncomplete),
            ConnectionState::Dropped | ConnectionState::Closed => return Err(Error::NotConnected),
            ConnectionState::Working => {}
        }
        let device = connection
            .device_identity()
            .ok_or(Error::HandshakeIncomplete)?;
        if device != self.device {
            return Err(Error::DeviceMismatch {
                expected: self.device.to_string(),
                actual: device.to_string(),
            });
        }
        if self
            .primary
            .as_ref()
            .is_some_and(|primary| primary.id() == connection.id())
        {
            return Ok(());
        }

        // The new connection is committed before the old one is released, so the
        // device always has a usable connection registered.
        let new_id = connection.id();
        let old = self.primary.replace(connection);
        self.ever_connected = true;
        self.executor.trigger_event(ChainEvent::ConnectionReplaced {
            old: old.as_ref().map(ConnectionContext::id),
            new: new_id,
        });
        match old {
            Some(old) => {
                info!(device = %self.device, old = %old.id(), new = %new_id, "Primary connection replaced");
                old.close().await;
            }
            None => info!(device = %self.device, new = %new_id, "Primary connection installed"),
        }

        // Replacing the connection never changes mastership by itself; only a
        // sleeping chain resumes the role it had before the loss.
        if self.state() == ContextChainState::Sleeping {
            self.resume().await?;
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.dormant_deadline = None;
        let target = self.resume_state;
        info!(device = %self.device, resume = %target, "Connection restored, waking chain");

        if StateValidator::runs_master_activity(target) {
            if let Err(e) = self.registry.start_all().await {
                error!(device = %self.device, error = %e, "Failed to resume master, subsystems rolled back");
                self.executor
                    .transition_to(ContextChainState::Initialization)?;
                return Err(e);
            }
        }
        self.executor.transition_to(target)
    }

    async fn enter_sleeping(&mut self) -> Result<()> {
        let current = self.state();
        if current == ContextChainState::Sleeping {
            return Ok(());
        }
        if StateValidator::runs_master_activity(current) {
            self.registry.stop_all().await;
        }
        self.resume_state = current;
        self.executor.transition_to(ContextChainState::Sleeping)
    }

    fn mark_primary_dropped(&self) {
        if let Some(connection) = &self.primary {
            if connection.mark_dropped() {
                warn!(device = %self.device, connection = %connection.id(), "Primary connection dropped");
                self.executor
                    .trigger_event(ChainEvent::ConnectionDropped(connection.id()));
            }
        }
    }

    async fn connection_dropped(&mut self) -> Result<()> {
        if !self.ever_connected {
            return Err(Error::NoConnection);
        }
        self.mark_primary_dropped();
        self.enter_sleeping().await
    }

    async fn sleep_the_chain_and_drop_connection(&mut self) -> Result<()> {
        self.mark_primary_dropped();
        self.enter_sleeping().await?;
        if let Some(connection) = self.primary.take() {
            connection.close().await;
        }
        if self.dormant_deadline.is_none() {
            debug!(device = %self.device, timeout = ?self.config.sleep_timeout, "Chain dormant, waiting for a new connection");
            self.dormant_deadline = Some(Box::pin(sleep(self.config.sleep_timeout)));
        }
        Ok(())
    }

    async fn connection_lost(&mut self, connection_id: ConnectionId) -> Result<bool> {
        let is_primary = self
            .primary
            .as_ref()
            .is_some_and(|primary| primary.id() == connection_id);
        if !is_primary {
            debug!(device = %self.device, connection = %connection_id, "Lost connection was already superseded");
            return Ok(false);
        }
        self.connection_dropped().await?;
        self.sleep_the_chain_and_drop_connection().await?;
        Ok(true)
    }

    async fn register_services(
        &mut self,
        provider: Arc<dyn ClusterSingletonProvider>,
    ) -> Result<usize> {
        let mut registered = 0;
        for service in self.services.clone() {
            let name = service.name().to_string();
            if self.registrations.contains_key(&name) {
                continue;
            }
            let registration = provider
                .register_service(&self.device, service)
                .await
                .map_err(|source| Error::Registration {
                    service: name.clone(),
                    source,
                })?;
            info!(device = %self.device, service = %name, "Lifecycle service registered with cluster");
            self.registrations.insert(name.clone(), registration);
            self.executor
                .trigger_event(ChainEvent::ServiceRegistered { name });
            registered += 1;
        }
        Ok(registered)
    }

    /// Releases everything the chain holds and moves it to `Closed`. Failures of
    /// individual subsystems or registrations are logged; teardown always completes.
    ///
    /// 释放链持有的一切并转换到 `Closed`。单个子系统或注册的失败会被记录；拆除总会完成。
    async fn shutdown(&mut self) {
        if self.state() == ContextChainState::Closed {
            return;
        }
        info!(device = %self.device, state = %self.state(), "Closing context chain");

        self.dormant_deadline = None;
        self.registry.stop_all().await;
        self.registry.release();
        if let Some(connection) = self.primary.take() {
            connection.close().await;
        }

        let registrations: Vec<(String, Box<dyn ServiceRegistration>)> =
            self.registrations.drain().collect();
        for (name, registration) in registrations {
            if let Err(e) = registration.close().await {
                warn!(device = %self.device, service = %name, error = %e, "Failed to close service registration");
            }
        }
        self.services.clear();

        if let Err(e) = self.executor.transition_to(ContextChainState::Closed) {
            error!(device = %self.device, error = %e, "Unexpected failure closing chain");
        }
        self.executor.clear_event_listeners();
    }
}

async fn wait_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
