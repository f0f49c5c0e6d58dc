//! 定义了上下文链和持有者的可配置参数。
//! Defines configurable parameters for context chains and the chain holder.

use crate::subsystem::SubsystemKind;
use std::time::Duration;

/// A structure containing all configurable parameters.
///
/// 包含所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Per-chain parameters.
    /// 每条链的参数。
    pub chain: ChainConfig,

    /// Holder-wide parameters.
    /// 持有者范围的参数。
    pub holder: HolderConfig,
}

/// Parameters for a single device's context chain.
///
/// 单个设备上下文链的参数。
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Subsystem slots that must be filled before the chain may start.
    /// 链启动之前必须填充的子系统槽位。
    pub required_subsystems: Vec<SubsystemKind>,
    /// The maximum time a single subsystem may take to start.
    /// A subsystem exceeding it is treated as a failed start.
    ///
    /// 单个子系统启动可花费的最长时间。超过该时间视为启动失败。
    pub subsystem_start_timeout: Duration,
    /// The maximum time to wait for a single subsystem to stop.
    /// 等待单个子系统停止的最长时间。
    pub subsystem_stop_timeout: Duration,
    /// How long a dormant chain without a connection waits for a replacement
    /// connection before closing itself.
    ///
    /// 没有连接的休眠链在自行关闭之前等待替换连接的时间。
    pub sleep_timeout: Duration,
    /// Capacity of the chain actor's command channel.
    /// 链 actor 命令通道的容量。
    pub command_channel_capacity: usize,
}

/// Parameters for the chain holder.
///
/// 链持有者的参数。
#[derive(Debug, Clone, Default)]
pub struct HolderConfig {
    /// The maximum number of devices with a live chain. `None` means unlimited.
    /// 拥有活动链的最大设备数量。`None` 表示不限制。
    pub max_devices: Option<usize>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            required_subsystems: vec![
                SubsystemKind::Device,
                SubsystemKind::Rpc,
                SubsystemKind::Statistics,
            ],
            subsystem_start_timeout: Duration::from_secs(10),
            subsystem_stop_timeout: Duration::from_secs(5),
            sleep_timeout: Duration::from_secs(30),
            command_channel_capacity: 64,
        }
    }
}

impl ChainConfig {
    /// Builds a config requiring exactly the given subsystems, other fields default.
    /// 构建一个仅要求给定子系统的配置，其他字段使用默认值。
    pub fn with_required(required: impl IntoIterator<Item = SubsystemKind>) -> Self {
        Self {
            required_subsystems: required.into_iter().collect(),
            ..Self::default()
        }
    }
}
