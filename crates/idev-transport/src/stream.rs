//! 基于标准库 socket 的连接实现
//!
//! 服务连接通常经由 usbmuxd 的 Unix socket 或本地转发的 TCP 端口建立，
//! 二者都实现了 `Read + Write`，这里只统一超时与关闭语义。

use crate::{ServiceConnection, TransportError};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// 支持读超时与关闭的 socket
pub trait Socket: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
    fn shutdown(&self) -> std::io::Result<()>;
}

impl Socket for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Socket for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

pub struct StreamConnection<S> {
    stream: S,
    closed: bool,
}

impl<S: Socket> StreamConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl StreamConnection<TcpStream> {
    /// 连接到已转发的服务端口
    pub fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        debug!("Connected to {:?}", stream.peer_addr().ok());
        Ok(Self::new(stream))
    }
}

impl<S: Socket> ServiceConnection for StreamConnection<S> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream.write_all(data)?;
        self.stream.flush()?;
        trace!("Sent {} bytes", data.len());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Ok(0);
        }
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // 不同平台上读超时分别表现为 WouldBlock 或 TimedOut
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        // 零时长在标准库中是非法参数
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (StreamConnection<TcpStream>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || listener.accept().unwrap().0);
        let client = StreamConnection::connect_tcp(addr).unwrap();
        (client, accept.join().unwrap())
    }

    #[test]
    fn test_tcp_send_receive() {
        let (mut client, mut server) = pair();
        client.send(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        let mut got = Vec::new();
        while got.len() < 4 {
            let mut chunk = [0u8; 4];
            let n = client.receive(&mut chunk).unwrap();
            got.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(got, b"pong");
    }

    #[test]
    fn test_tcp_receive_timeout() {
        let (mut client, _server) = pair();
        client
            .set_receive_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            client.receive(&mut buf),
            Err(TransportError::Timeout)
        ));
    }

    #[test]
    fn test_tcp_peer_close_is_eof() {
        let (mut client, server) = pair();
        drop(server);
        let mut buf = [0u8; 1];
        assert_eq!(client.receive(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_shutdown_rejects_send() {
        let (mut client, _server) = pair();
        client.shutdown().unwrap();
        client.shutdown().unwrap();
        assert!(matches!(client.send(b"x"), Err(TransportError::Closed)));
    }
}
