//! Commands processed by the chain actor.

use super::transitions::EventListener;
use crate::{
    connection::{ConnectionContext, ConnectionId},
    error::Result,
    lifecycle::{ClusterSingletonProvider, LifecycleService},
    subsystem::{SubsystemContext, SubsystemKind},
};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Commands sent to the `ChainActor`.
///
/// Every chain-mutating operation is a command, so the actor's command queue is
/// the chain's single exclusion domain and commands apply in the order issued.
///
/// 发送到 `ChainActor` 的命令。
///
/// 每个修改链的操作都是一个命令，因此 actor 的命令队列是链唯一的互斥域，命令按发出顺序生效。
pub(crate) enum ChainCommand {
    AddContext {
        context: Arc<dyn SubsystemContext>,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    AddLifecycleService {
        service: Arc<dyn LifecycleService>,
        response_tx: oneshot::Sender<bool>,
    },
    IsReady {
        response_tx: oneshot::Sender<bool>,
    },
    StartChain {
        response_tx: oneshot::Sender<Result<()>>,
    },
    StopChain {
        response_tx: oneshot::Sender<Result<()>>,
    },
    MakeDeviceSlave {
        response_tx: oneshot::Sender<Result<()>>,
    },
    ChangePrimaryConnection {
        connection: ConnectionContext,
        response_tx: oneshot::Sender<Result<()>>,
    },
    ConnectionDropped {
        response_tx: oneshot::Sender<Result<()>>,
    },
    SleepAndDropConnection {
        response_tx: oneshot::Sender<Result<()>>,
    },
    /// Loss of a specific connection, as reported by the connection handler.
    /// Ignored when that connection was already superseded.
    ///
    /// 连接处理器报告的特定连接丢失。如果该连接已被取代则忽略。
    ConnectionLost {
        connection_id: ConnectionId,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    RegisterServices {
        provider: Arc<dyn ClusterSingletonProvider>,
        response_tx: oneshot::Sender<Result<usize>>,
    },
    PrimaryConnection {
        response_tx: oneshot::Sender<Option<ConnectionContext>>,
    },
    StartedSubsystems {
        response_tx: oneshot::Sender<Vec<SubsystemKind>>,
    },
    RegisteredSubsystems {
        response_tx: oneshot::Sender<Vec<SubsystemKind>>,
    },
    RegisterEventListener {
        listener: EventListener,
    },
    Close {
        response_tx: oneshot::Sender<Result<()>>,
    },
}

impl ChainCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ChainCommand::AddContext { .. } => "AddContext",
            ChainCommand::AddLifecycleService { .. } => "AddLifecycleService",
            ChainCommand::IsReady { .. } => "IsReady",
            ChainCommand::StartChain { .. } => "StartChain",
            ChainCommand::StopChain { .. } => "StopChain",
            ChainCommand::MakeDeviceSlave { .. } => "MakeDeviceSlave",
            ChainCommand::ChangePrimaryConnection { .. } => "ChangePrimaryConnection",
            ChainCommand::ConnectionDropped { .. } => "ConnectionDropped",
            ChainCommand::SleepAndDropConnection { .. } => "SleepAndDropConnection",
            ChainCommand::ConnectionLost { .. } => "ConnectionLost",
            ChainCommand::RegisterServices { .. } => "RegisterServices",
            ChainCommand::PrimaryConnection { .. } => "PrimaryConnection",
            ChainCommand::StartedSubsystems { .. } => "StartedSubsystems",
            ChainCommand::RegisteredSubsystems { .. } => "RegisteredSubsystems",
            ChainCommand::RegisterEventListener { .. } => "RegisterEventListener",
            ChainCommand::Close { .. } => "Close",
        }
    }
}
