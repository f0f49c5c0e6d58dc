//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::{chain::ContextChainState, subsystem::SubsystemKind};
use thiserror::Error;

/// Boxed error reported by external collaborators (subsystems, transports, cluster providers).
/// 外部协作者（子系统、传输、集群提供者）报告的装箱错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The primary error type for the context chain library.
/// 上下文链库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// `start_chain` was requested before every required subsystem registered.
    /// 在所有必需子系统注册之前请求了 `start_chain`。
    #[error("chain is not ready, missing subsystems: {missing:?}")]
    NotReady { missing: Vec<SubsystemKind> },

    /// A subsystem failed to start; already started subsystems were rolled back.
    /// 某个子系统启动失败；已启动的子系统已回滚。
    #[error("subsystem {kind} failed to start")]
    SubsystemStart {
        kind: SubsystemKind,
        #[source]
        source: BoxError,
    },

    /// A subsystem reported itself as not ready when asked to start.
    /// 子系统在被要求启动时报告自身未就绪。
    #[error("subsystem {0} is not ready")]
    SubsystemNotReady(SubsystemKind),

    /// A subsystem did not finish starting within the configured timeout.
    /// 子系统未在配置的超时时间内完成启动。
    #[error("subsystem {kind} timed out")]
    SubsystemTimeout { kind: SubsystemKind },

    /// The requested role transition is not allowed from the current state.
    /// 当前状态不允许请求的角色转换。
    #[error("invalid chain transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ContextChainState,
        to: ContextChainState,
    },

    /// The chain has already been closed.
    /// 链已经关闭。
    #[error("context chain is already closed")]
    ChainClosed,

    /// No connection was ever registered with the chain.
    /// 链上从未注册过连接。
    #[error("no connection was ever registered with the chain")]
    NoConnection,

    /// The operation needs a live primary connection but the chain is dormant.
    /// 操作需要活动的主连接，但链处于休眠状态。
    #[error("primary connection was dropped")]
    ConnectionDropped,

    /// The connection has not completed its handshake yet.
    /// 连接尚未完成握手。
    #[error("connection has not completed its handshake")]
    HandshakeIncomplete,

    /// The connection belongs to a different device than the chain.
    /// 连接属于与链不同的设备。
    #[error("connection belongs to device {actual}, expected {expected}")]
    DeviceMismatch { expected: String, actual: String },

    /// The connection is not in a working state.
    /// 连接未处于工作状态。
    #[error("connection not established")]
    NotConnected,

    /// The underlying transport reported a failure.
    /// 底层传输报告失败。
    #[error("transport error")]
    Transport(#[source] BoxError),

    /// A lifecycle service could not be registered with the cluster provider.
    /// 生命周期服务无法注册到集群提供者。
    #[error("failed to register lifecycle service {service}")]
    Registration {
        service: String,
        #[source]
        source: BoxError,
    },

    /// The holder has no chain for the given device.
    /// 持有者没有该设备的链。
    #[error("no context chain for device {0}")]
    UnknownDevice(String),
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure was caused by a closed chain.
    /// 失败是否由已关闭的链引起。
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ChainClosed)
    }
}
