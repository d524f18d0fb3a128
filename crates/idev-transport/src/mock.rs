//! 内存双工管道（仅用于测试）
//!
//! [`duplex`] 返回两个相连的端点，一端写入的字节按顺序出现在另一端。
//! 任一端 `shutdown` 或被 drop 后，对端读完剩余数据即得到 EOF。

use crate::{ServiceConnection, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::time::Duration;

pub struct MockConnection {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    timeout: Option<Duration>,
    max_read: usize,
    eof: bool,
}

/// 创建一对相连的内存连接
pub fn duplex() -> (MockConnection, MockConnection) {
    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();
    (MockConnection::new(a_tx, b_rx), MockConnection::new(b_tx, a_rx))
}

impl MockConnection {
    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            pending: Vec::new(),
            timeout: None,
            max_read: usize::MAX,
            eof: false,
        }
    }

    /// 限制每次 `receive` 返回的最大字节数，用于模拟分片到达
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len()).min(self.max_read);
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl ServiceConnection for MockConnection {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        if data.is_empty() {
            return Ok(());
        }
        tx.send(data.to_vec()).map_err(|_| TransportError::Closed)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }
        if self.eof {
            return Ok(0);
        }
        let chunk = match self.timeout {
            None => self.rx.recv().ok(),
            Some(t) if t.is_zero() => match self.rx.try_recv() {
                Ok(chunk) => Some(chunk),
                Err(TryRecvError::Empty) => return Err(TransportError::Timeout),
                Err(TryRecvError::Disconnected) => None,
            },
            Some(t) => match self.rx.recv_timeout(t) {
                Ok(chunk) => Some(chunk),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        match chunk {
            Some(chunk) => {
                self.pending = chunk;
                Ok(self.take_pending(buf))
            },
            None => {
                self.eof = true;
                Ok(0)
            },
        }
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.timeout = timeout;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}
