//! 帧级读取保护
//!
//! 长度前缀协议一旦读到帧的一部分就不能再"放弃"，否则后续所有读取都会错位。
//! `FramedConnection` 把读取分成两个阶段：
//!
//! 1. `begin_frame`：在帧边界等待第一个字节，此时超时是安全的
//! 2. `finish_frame`：帧已开始，必须读完；超过 `frame_timeout` 则连接作废
//!
//! 作废（poisoned）的连接拒绝之后的所有读写。

use crate::{ServiceConnection, TransportError};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 默认帧完成超时
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FramedConnection<C> {
    inner: C,
    frame_timeout: Duration,
    poisoned: Option<String>,
}

impl<C: ServiceConnection> FramedConnection<C> {
    pub fn new(inner: C) -> Self {
        Self::with_frame_timeout(inner, DEFAULT_FRAME_TIMEOUT)
    }

    pub fn with_frame_timeout(inner: C, frame_timeout: Duration) -> Self {
        Self {
            inner,
            frame_timeout,
            poisoned: None,
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        self.frame_timeout
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// 标记连接不可用，并尽力关闭底层连接
    pub fn poison(&mut self, reason: impl Into<String>) {
        if self.poisoned.is_none() {
            let reason = reason.into();
            warn!("Service connection poisoned: {}", reason);
            let _ = self.inner.shutdown();
            self.poisoned = Some(reason);
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        match &self.poisoned {
            Some(reason) => Err(TransportError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.check()?;
        if let Err(e) = self.inner.send(data) {
            // 部分写入后对端无法再同步
            self.poison(format!("send failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.check()?;
        self.inner.set_receive_timeout(timeout)
    }

    /// 在帧边界等待帧的开始，并读满 `header`
    ///
    /// - `Ok(true)`：`header` 已填满
    /// - `Ok(false)`：对端在帧边界处干净地关闭
    /// - `Err(Timeout)`：没有读到任何字节，连接仍可用
    pub fn begin_frame(&mut self, header: &mut [u8]) -> Result<bool, TransportError> {
        self.check()?;
        if header.is_empty() {
            return Ok(true);
        }
        let n = match self.inner.receive(header) {
            Ok(0) => return Ok(false),
            Ok(n) => n,
            Err(TransportError::Timeout) => return Err(TransportError::Timeout),
            Err(e) => {
                self.poison(format!("receive failed: {e}"));
                return Err(e);
            },
        };
        trace!("Frame started with {} bytes", n);
        self.fill(header, n)?;
        Ok(true)
    }

    /// 与 `begin_frame` 相同，但在 `frame_timeout` 内持续等待
    ///
    /// 用于请求已发出、响应必须到达的场景：超时意味着请求/响应失配，连接作废。
    pub fn await_frame(&mut self, header: &mut [u8]) -> Result<bool, TransportError> {
        let deadline = Instant::now() + self.frame_timeout;
        loop {
            match self.begin_frame(header) {
                Err(TransportError::Timeout) if Instant::now() < deadline => continue,
                Err(TransportError::Timeout) => {
                    self.poison("no response within frame timeout");
                    return Err(TransportError::Timeout);
                },
                other => return other,
            }
        }
    }

    /// 读满帧的剩余部分
    pub fn finish_frame(&mut self, body: &mut [u8]) -> Result<(), TransportError> {
        self.check()?;
        self.fill(body, 0)
    }

    /// 放弃当前帧（调用方已读取部分帧但决定不再继续）
    pub fn abandon_frame(&mut self, reason: impl Into<String>) {
        self.poison(reason);
    }

    fn fill(&mut self, buf: &mut [u8], mut filled: usize) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.frame_timeout;
        while filled < buf.len() {
            match self.inner.receive(&mut buf[filled..]) {
                Ok(0) => {
                    self.poison(format!("EOF after {filled} of {} bytes", buf.len()));
                    return Err(TransportError::Closed);
                },
                Ok(n) => filled += n,
                Err(TransportError::Timeout) => {
                    if Instant::now() >= deadline {
                        let reason = format!(
                            "frame incomplete after {:?} ({filled} of {} bytes)",
                            self.frame_timeout,
                            buf.len()
                        );
                        self.poison(reason.clone());
                        return Err(TransportError::Poisoned(reason));
                    }
                },
                Err(e) => {
                    self.poison(format!("receive failed mid-frame: {e}"));
                    return Err(e);
                },
            }
        }
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown()
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}
