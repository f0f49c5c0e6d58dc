//! A single transport session to a device and the handshake data negotiated on it.
//! 到设备的单个传输会话以及在其上协商的握手数据。

pub mod channel;

pub use channel::ControlChannel;

use crate::{
    device::{DatapathId, DeviceIdentity},
    error::{Error, Result},
};
use bytes::Bytes;
use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};
use tracing::{debug, warn};

/// Unique id of one transport session.
/// 单个传输会话的唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Protocol version negotiated during the hello exchange.
/// 在 hello 交换期间协商的协议版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolVersion {
    Of10 = 0x01,
    Of13 = 0x04,
}

/// Device features learned from the features reply.
///
/// 从特性应答中获知的设备特性。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturesReply {
    pub datapath_id: DatapathId,
    pub buffers: u32,
    pub tables: u8,
    /// Non-zero for auxiliary connections.
    /// 辅助连接为非零值。
    pub auxiliary_id: u8,
    pub capabilities: u32,
}

/// Liveness of a connection.
///
/// 连接的存活状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport is up, handshake still running.
    /// 传输已建立，握手仍在进行。
    Handshaking = 0,
    /// Handshake complete, the connection carries traffic.
    /// 握手完成，连接承载流量。
    Working = 1,
    /// The transport was lost; resources not yet released.
    /// 传输已丢失；资源尚未释放。
    Dropped = 2,
    /// The connection was closed and its transport released.
    /// 连接已关闭，其传输已释放。
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Handshaking,
            1 => ConnectionState::Working,
            2 => ConnectionState::Dropped,
            _ => ConnectionState::Closed,
        }
    }
}

struct Inner {
    id: ConnectionId,
    version: ProtocolVersion,
    channel: Arc<dyn ControlChannel>,
    features: OnceLock<FeaturesReply>,
    state: AtomicU8,
}

/// A cheap, cloneable handle to one transport session with a device.
///
/// Clones share the same session; the chain owns the primary one and the
/// connection handler keeps its own clone to report handshake and loss.
///
/// 到设备的一个传输会话的廉价可克隆句柄。
///
/// 克隆共享同一个会话；链拥有主连接，连接处理器保留自己的克隆以报告握手和丢失。
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version)
            .field("remote_addr", &self.inner.channel.remote_addr())
            .field("features", &self.inner.features.get())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionContext {
    /// Wraps an established transport; the connection starts in `Handshaking`.
    /// 包装一个已建立的传输；连接以 `Handshaking` 状态开始。
    pub fn new(channel: Arc<dyn ControlChannel>, version: ProtocolVersion) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::random(),
                version,
                channel,
                features: OnceLock::new(),
                state: AtomicU8::new(ConnectionState::Handshaking as u8),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.channel.remote_addr()
    }

    pub fn features(&self) -> Option<&FeaturesReply> {
        self.inner.features.get()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The logical device behind this connection, known once the handshake completed.
    /// 此连接背后的逻辑设备，在握手完成后可知。
    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        self.features()
            .map(|features| DeviceIdentity::from_datapath_id(features.datapath_id))
    }

    /// Whether the handshake completed and the connection still carries traffic.
    /// 握手是否已完成且连接仍在承载流量。
    pub fn is_working(&self) -> bool {
        self.state() == ConnectionState::Working
    }

    /// Records the features reply and moves the connection to `Working`.
    ///
    /// The features are recorded first so a `Working` connection always has
    /// them. If the transport is dropped in between, the call fails with
    /// `NotConnected` and the features stay recorded on the dead connection;
    /// its state, not `features()`, tells whether the handshake completed.
    ///
    /// 记录特性应答并将连接转换为 `Working`。
    ///
    /// 特性先被记录，因此 `Working` 连接总是拥有它们。如果传输在此期间丢失，调用以
    /// `NotConnected` 失败，特性仍记录在已失效的连接上；握手是否完成取决于其状态，而不是 `features()`。
    pub fn complete_handshake(&self, features: FeaturesReply) -> Result<DeviceIdentity> {
        if self.state() != ConnectionState::Handshaking {
            return Err(Error::NotConnected);
        }
        let device = DeviceIdentity::from_datapath_id(features.datapath_id);
        self.inner
            .features
            .set(features)
            .map_err(|_| Error::NotConnected)?;
        self.inner
            .state
            .compare_exchange(
                ConnectionState::Handshaking as u8,
                ConnectionState::Working as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::NotConnected)?;
        debug!(connection = %self.id(), %device, "Handshake completed");
        Ok(device)
    }

    /// Marks the transport as lost. Returns `false` if it was already dropped or closed.
    ///
    /// 将传输标记为丢失。如果已经丢失或关闭则返回 `false`。
    pub fn mark_dropped(&self) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if matches!(
                ConnectionState::from_u8(current),
                ConnectionState::Dropped | ConnectionState::Closed
            ) {
                return false;
            }
            match self.inner.state.compare_exchange(
                current,
                ConnectionState::Dropped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Sends an encoded message to the device.
    /// 向设备发送已编码的消息。
    pub async fn send(&self, message: Bytes) -> Result<()> {
        if !self.is_working() {
            return Err(Error::NotConnected);
        }
        self.inner
            .channel
            .send(message)
            .await
            .map_err(Error::Transport)
    }

    /// Closes the connection and releases its transport. Closing twice is a no-op.
    ///
    /// 关闭连接并释放其传输。重复关闭不执行任何操作。
    pub async fn close(&self) {
        let previous = self
            .inner
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.inner.channel.close().await {
            warn!(connection = %self.id(), error = %e, "Failed to close transport");
        }
        debug!(connection = %self.id(), "Connection closed");
    }
}
