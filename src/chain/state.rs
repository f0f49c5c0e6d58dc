//! The state of a context chain.
//! 上下文链的状态。

use std::fmt;

/// Enumerated state of a context chain. Exactly one value holds at any instant.
///
/// 上下文链的枚举状态。任一时刻恰好有一个值成立。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextChainState {
    /// Created, no subsystem registered yet.
    /// 已创建，尚未注册任何子系统。
    Undefined,
    /// Subsystems registered but not started.
    /// 子系统已注册但未启动。
    Initialization,
    /// This node drives the device; every subsystem is started.
    /// 本节点驱动设备；所有子系统都已启动。
    WorkingMaster,
    /// Standby; subsystems registered but passive.
    /// 备用；子系统已注册但处于被动状态。
    WorkingSlave,
    /// Connection lost; contexts kept, master activity suspended.
    /// 连接丢失；保留上下文，暂停主节点活动。
    Sleeping,
    /// Terminal; every resource released.
    /// 终止；所有资源已释放。
    Closed,
}

impl ContextChainState {
    pub fn name(&self) -> &'static str {
        match self {
            ContextChainState::Undefined => "Undefined",
            ContextChainState::Initialization => "Initialization",
            ContextChainState::WorkingMaster => "WorkingMaster",
            ContextChainState::WorkingSlave => "WorkingSlave",
            ContextChainState::Sleeping => "Sleeping",
            ContextChainState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ContextChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
