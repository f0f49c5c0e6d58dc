//! 上下文链：一个设备的连接、子系统上下文和生命周期服务，以及驱动它们的状态机。
//! Context chain: one device's connection, subsystem contexts and lifecycle
//! services, and the state machine that drives them.
//!
//! 每条链由一个专用的 actor 任务拥有；[`ContextChain`] 句柄将操作作为命令转发给它。
//!
//! Each chain is owned by a dedicated actor task; the [`ContextChain`] handle
//! forwards operations to it as commands.

mod actor;
mod command;
pub mod handle;
pub mod state;
pub mod transitions;
pub mod validation;

pub use handle::{ChainId, ContextChain, WeakContextChain};
pub use state::ContextChainState;
pub use transitions::{ChainEvent, EventListener, StateTransitionExecutor};
pub use validation::StateValidator;
