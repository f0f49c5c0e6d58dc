//! Subsystem contexts owned by a context chain and the registry that tracks them.
//!
//! 上下文链拥有的子系统上下文，以及跟踪它们的注册表。

pub mod registry;

pub use registry::SubsystemRegistry;

use crate::error::BoxError;
use async_trait::async_trait;
use std::fmt;

/// The closed set of subsystem kinds a chain can hold, one slot per kind.
///
/// The declaration order is the start order; subsystems stop in reverse.
///
/// 链可以持有的子系统种类的封闭集合，每种一个槽位。
///
/// 声明顺序即启动顺序；子系统按相反顺序停止。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubsystemKind {
    /// Device session state and the initial device inventory.
    /// 设备会话状态和初始设备清单。
    Device,
    /// Rule/flow registry and reconciliation.
    /// 规则/流注册表和协调。
    Flow,
    /// RPC dispatch towards the device.
    /// 面向设备的 RPC 分派。
    Rpc,
    /// Statistics polling.
    /// 统计轮询。
    Statistics,
}

impl SubsystemKind {
    pub fn name(&self) -> &'static str {
        match self {
            SubsystemKind::Device => "device",
            SubsystemKind::Flow => "flow",
            SubsystemKind::Rpc => "rpc",
            SubsystemKind::Statistics => "statistics",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An independently startable and stoppable unit of device functionality.
///
/// `start` begins master-only activity (polling, RPC dispatch, flow
/// programming); `stop` ceases it but keeps the context usable so that the
/// chain can start it again on re-election.
///
/// 可独立启动和停止的设备功能单元。
///
/// `start` 开始仅主节点的活动（轮询、RPC 分派、流编程）；`stop` 停止这些活动，
/// 但保持上下文可用，以便链在重新当选时再次启动它。
#[async_trait]
pub trait SubsystemContext: Send + Sync + 'static {
    /// The slot this context occupies.
    fn kind(&self) -> SubsystemKind;

    /// Whether the context can be started right now.
    fn is_ready(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<(), BoxError>;

    async fn stop(&self) -> Result<(), BoxError>;
}
