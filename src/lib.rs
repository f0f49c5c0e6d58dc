#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the device context chain library.
//! 设备上下文链库的根。
//!
//! A controller node keeps one [`ContextChain`] per connected switch. The chain
//! owns the device's primary connection and its subsystem contexts, and moves
//! between standby and master as the cluster decides. [`ContextChainHolder`]
//! keys the chains by device and relays connection and cluster events to them.
//!
//! 控制器节点为每个已连接的交换机保存一条 [`ContextChain`]。链拥有设备的主连接和子系统上下文，
//! 并按集群的决定在备用与主节点之间切换。[`ContextChainHolder`] 按设备存储链，并将连接和集群事件转发给它们。

pub mod chain;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod holder;
pub mod lifecycle;
pub mod subsystem;

#[cfg(test)]
mod test_utils;

pub use chain::{ChainEvent, ContextChain, ContextChainState, WeakContextChain};
pub use config::{ChainConfig, Config, HolderConfig};
pub use connection::{ConnectionContext, ConnectionState, ControlChannel};
pub use device::DeviceIdentity;
pub use error::{Error, Result};
pub use holder::{ConnectionStatus, ContextChainHolder, SubsystemFactory};
pub use lifecycle::{ChainLifecycleService, ClusterSingletonProvider, LifecycleService, ServiceRegistration};
pub use subsystem::{SubsystemContext, SubsystemKind};
