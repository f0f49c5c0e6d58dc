//! Stable identity of a logical device.
//! 逻辑设备的稳定标识。

use std::{fmt, sync::Arc};

/// Datapath identifier announced by a switch in its features reply.
/// 交换机在特性应答中宣告的数据通路标识符。
pub type DatapathId = u64;

/// Opaque, stable identifier of a logical device.
///
/// The identity outlives any single transport session: a device reconnecting on
/// a new socket keeps the same identity and therefore the same chain.
///
/// 逻辑设备的不透明稳定标识符。
///
/// 该标识比任何单个传输会话的生命周期都长：设备在新套接字上重连时保持相同的标识，因而保持相同的链。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity(Arc<str>);

impl DeviceIdentity {
    /// Creates an identity from an arbitrary node id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Creates the canonical `openflow:<dpid>` identity for a datapath.
    /// 为数据通路创建规范的 `openflow:<dpid>` 标识。
    pub fn from_datapath_id(datapath_id: DatapathId) -> Self {
        Self(format!("openflow:{datapath_id}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
