//! # idev Transport
//!
//! 设备服务连接抽象层。
//!
//! 连接本身（设备发现、配对、握手、TLS）由上层建立，这里只关心一条已经
//! 可用的字节流：
//!
//! - [`ServiceConnection`]: 最小的 `send` / `receive` 原语
//! - [`FramedConnection`]: 在其上保证"要么读到完整帧，要么关闭连接"
//! - [`StreamConnection`]: 基于 `TcpStream` / `UnixStream` 的实现
//! - `mock`（feature）：内存双工管道，用于测试

mod framed;
pub mod stream;

#[cfg(feature = "mock")]
pub mod mock;

pub use framed::{DEFAULT_FRAME_TIMEOUT, FramedConnection};
pub use stream::StreamConnection;

use std::time::Duration;
use thiserror::Error;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 接收超时（在帧边界处发生，连接仍可用）
    #[error("Read timeout")]
    Timeout,

    /// 对端关闭或本端已 shutdown
    #[error("Connection closed")]
    Closed,

    /// 读取到一半的帧被放弃，连接不再可用
    #[error("Connection poisoned: {0}")]
    Poisoned(String),
}

impl TransportError {
    /// 连接是否仍可继续使用
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// 已建立的设备服务字节流
///
/// 生命周期由调用方管理；实现只需提供可靠的有序字节流。
pub trait ServiceConnection: Send {
    /// 发送全部字节
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// 接收最多 `buf.len()` 字节
    ///
    /// - `Ok(0)`：对端已关闭（EOF）
    /// - `Err(TransportError::Timeout)`：超时，未消费任何字节
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 设置接收超时（`None` 表示无限等待）
    fn set_receive_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), TransportError> {
        Ok(())
    }

    /// 关闭连接（之后的 `send` 失败，对端读到 EOF）
    fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<C: ServiceConnection + ?Sized> ServiceConnection for Box<C> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).receive(buf)
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        (**self).set_receive_timeout(timeout)
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        (**self).shutdown()
    }
}
