//! 链状态转换逻辑模块
//! Chain State Transition Logic Module
//!
//! 该模块负责执行链状态转换、发布当前状态，并向监听器分发生命周期事件。
//!
//! This module executes chain state transitions, publishes the current state,
//! and dispatches lifecycle events to listeners.

use super::{state::ContextChainState, validation::StateValidator};
use crate::{
    connection::ConnectionId,
    device::DeviceIdentity,
    error::{Error, Result},
    subsystem::SubsystemKind,
};
use tokio::sync::watch;
use tracing::{info, trace, warn};

/// 链生命周期事件类型
/// Chain lifecycle event types
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// 状态转换事件
    /// State transition event
    StateTransition {
        from: ContextChainState,
        to: ContextChainState,
    },
    /// 子系统上下文已注册
    /// Subsystem context registered
    ContextAdded(SubsystemKind),
    /// 主连接被替换
    /// Primary connection replaced
    ConnectionReplaced {
        old: Option<ConnectionId>,
        new: ConnectionId,
    },
    /// 主连接丢失
    /// Primary connection lost
    ConnectionDropped(ConnectionId),
    /// 生命周期服务已注册到集群
    /// Lifecycle service registered with the cluster
    ServiceRegistered { name: String },
    /// 链已关闭
    /// Chain closed
    Closed,
}

/// 事件监听器类型定义
/// Event listener type definition
pub type EventListener = Box<dyn Fn(&ChainEvent) + Send + Sync>;

/// 状态转换执行器，负责执行状态转换和相关的事件处理
/// State transition executor responsible for executing state transitions and related event handling
pub struct StateTransitionExecutor {
    device: DeviceIdentity,
    state_tx: watch::Sender<ContextChainState>,
    event_listeners: Vec<EventListener>,
}

impl std::fmt::Debug for StateTransitionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTransitionExecutor")
            .field("device", &self.device)
            .field("state", &*self.state_tx.borrow())
            .field("event_listeners_count", &self.event_listeners.len())
            .finish()
    }
}

impl StateTransitionExecutor {
    /// 创建新的状态转换执行器，并返回当前状态的订阅端
    /// Create a new executor together with a subscriber for the current state
    pub fn new(device: DeviceIdentity) -> (Self, watch::Receiver<ContextChainState>) {
        let (state_tx, state_rx) = watch::channel(ContextChainState::Undefined);
        (
            Self {
                device,
                state_tx,
                event_listeners: Vec::new(),
            },
            state_rx,
        )
    }

    /// 当前状态
    /// Current state
    pub fn current(&self) -> ContextChainState {
        *self.state_tx.borrow()
    }

    /// 执行状态转换
    /// Execute state transition
    pub fn transition_to(&self, new_state: ContextChainState) -> Result<()> {
        let current = self.current();
        if !StateValidator::is_valid_transition(current, new_state) {
            warn!(
                device = %self.device,
                current_state = %current,
                attempted_state = %new_state,
                "Invalid state transition attempted"
            );
            return Err(Error::InvalidTransition {
                from: current,
                to: new_state,
            });
        }
        if current == new_state {
            return Ok(());
        }

        self.state_tx.send_replace(new_state);
        trace!(device = %self.device, from = %current, to = %new_state, "State transition executed");
        if StateValidator::is_working(new_state) {
            info!(device = %self.device, role = %new_state, "Chain role changed");
        }

        self.trigger_event(ChainEvent::StateTransition {
            from: current,
            to: new_state,
        });
        if new_state == ContextChainState::Closed {
            self.trigger_event(ChainEvent::Closed);
        }
        Ok(())
    }

    /// 注册事件监听器
    /// Register event listener
    pub fn register_event_listener(&mut self, listener: EventListener) {
        self.event_listeners.push(listener);
    }

    /// 移除所有事件监听器
    /// Remove all event listeners
    pub fn clear_event_listeners(&mut self) {
        self.event_listeners.clear();
    }

    /// 触发生命周期事件
    /// Trigger lifecycle event
    pub fn trigger_event(&self, event: ChainEvent) {
        for listener in &self.event_listeners {
            listener(&event);
        }
    }
}
