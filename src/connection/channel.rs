//! Traits for abstracting over the device control channel.
//!
//! 用于抽象设备控制通道的 trait。

use crate::error::BoxError;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::{Mutex, mpsc};

/// An established, bidirectional message channel to one device.
///
/// Encoding and socket handling live behind this trait; the chain only needs
/// to push already-encoded messages and release the channel.
///
/// 到一个设备的已建立的双向消息通道。
///
/// 编码和套接字处理位于此 trait 之后；链只需要推送已编码的消息并释放通道。
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Sends one encoded message to the device.
    async fn send(&self, message: Bytes) -> Result<(), BoxError>;

    /// Releases the transport. Called at most once per connection.
    async fn close(&self) -> Result<(), BoxError>;

    /// Returns the remote address of the device.
    fn remote_addr(&self) -> SocketAddr;
}

/// A `ControlChannel` that forwards outbound messages into a tokio channel,
/// for transports driven by a separate writer task.
///
/// 将出站消息转发到 tokio 通道的 `ControlChannel`，用于由独立写任务驱动的传输。
#[derive(Debug)]
pub struct MpscControlChannel {
    remote_addr: SocketAddr,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl MpscControlChannel {
    /// Creates the channel together with the receiver the writer task drains.
    /// The receiver yields `None` once the channel is closed.
    ///
    /// 创建通道以及写任务消费的接收端。通道关闭后接收端返回 `None`。
    pub fn new(remote_addr: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                remote_addr,
                outbound: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl ControlChannel for MpscControlChannel {
    async fn send(&self, message: Bytes) -> Result<(), BoxError> {
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or("control channel closed")?;
        sender
            .send(message)
            .await
            .map_err(|_| "control channel writer gone".into())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.outbound.lock().await.take();
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}
