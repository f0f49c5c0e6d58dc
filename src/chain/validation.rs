//! 上下文链状态验证逻辑模块
//! Context Chain State Validation Logic Module
//!
//! 该模块负责链状态转换的合法性检查和状态分类。
//!
//! This module handles legality checks for chain state transitions and
//! state classification.

use super::state::ContextChainState;

/// 状态验证器，负责所有状态相关的验证和检查逻辑
/// State validator responsible for all state-related validation and check logic
pub struct StateValidator;

impl StateValidator {
    /// 验证状态转换是否合法
    /// Validate if state transition is legal
    pub fn is_valid_transition(current: ContextChainState, new: ContextChainState) -> bool {
        use ContextChainState::*;

        match (current, new) {
            // Closed 是终止状态
            // Closed is terminal
            (Closed, _) => false,

            // 从任何其他状态都可以关闭
            // Can close from any other state
            (_, Closed) => true,

            // 同状态转换（幂等）
            // Same state transition (idempotent)
            (a, b) if a == b => true,

            (Undefined, Initialization) => true,

            (Initialization, WorkingMaster) => true,
            (Initialization, WorkingSlave) => true,

            // 角色切换
            // Role switches
            (WorkingMaster, WorkingSlave) => true,
            (WorkingSlave, WorkingMaster) => true,
            (WorkingMaster | WorkingSlave, Initialization) => true,

            // 连接丢失进入休眠，新连接到达后恢复
            // Connection loss enters sleep, a new connection resumes
            (Undefined | Initialization | WorkingMaster | WorkingSlave, Sleeping) => true,
            (Sleeping, Undefined | Initialization | WorkingMaster | WorkingSlave) => true,

            _ => false,
        }
    }

    /// 检查链是否处于工作状态
    /// Check if the chain is in a working role
    pub fn is_working(state: ContextChainState) -> bool {
        matches!(
            state,
            ContextChainState::WorkingMaster | ContextChainState::WorkingSlave
        )
    }

    /// 检查子系统是否应当运行主节点活动
    /// Check if subsystems should run master activity
    pub fn runs_master_activity(state: ContextChainState) -> bool {
        matches!(state, ContextChainState::WorkingMaster)
    }
}
