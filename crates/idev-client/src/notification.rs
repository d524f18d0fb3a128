//! 通知代理客户端
//!
//! 主机与设备通过同一条连接交换命名事件：
//! - 写路径：`post` / `observe` / `observe_many`
//! - 读路径：`poll_once` 或后台监听线程 `listen`
//!
//! # 读写互斥
//!
//! 连接没有独立的读写通道，因此读写都要先获取同一把连接锁。
//! 监听线程每次只持锁一个接收时间片（`receive_timeout_ms`），
//! 在帧边界处超时后释放，写操作得以穿插执行；帧一旦开始就必须读完。
//!
//! # 回调
//!
//! 回调在监听线程上执行，不持有连接锁，因此可以在回调中调用 `post`；
//! 但回调应尽快返回，耗时处理请转交 [`ChannelCallback`]。

use crate::{ClientConfig, ServiceError};
use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use idev_protocol::notification::body_length;
use idev_protocol::{ErrorKind, NOTIFICATION_LENGTH_PREFIX, ProtocolError, ProxyMessage};
use idev_transport::{FramedConnection, ServiceConnection, TransportError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// 设备推送的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub name: String,
}

/// 通知回调 Trait
///
/// 在监听线程上调用；实现应非阻塞。
pub trait NotificationCallback: Send + Sync {
    fn on_notification(&self, event: &NotificationEvent);
}

impl<F> NotificationCallback for F
where
    F: Fn(&NotificationEvent) + Send + Sync,
{
    fn on_notification(&self, event: &NotificationEvent) {
        self(event)
    }
}

/// 把事件转发到有界 channel 的回调
///
/// 使用 `try_send`，channel 满时丢弃事件并计数，从不阻塞监听线程。
pub struct ChannelCallback {
    sender: Sender<NotificationEvent>,
    dropped: AtomicU64,
}

impl ChannelCallback {
    pub fn new(capacity: usize) -> (Self, Receiver<NotificationEvent>) {
        let (sender, receiver) = bounded(capacity);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// 因 channel 满或接收端关闭而丢弃的事件数
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NotificationCallback for ChannelCallback {
    fn on_notification(&self, event: &NotificationEvent) {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

// ============================================================================
// 读路径
// ============================================================================

/// 一次读取的结果分类
enum Step {
    Event(NotificationEvent),
    /// 设备宣告代理结束或连接在帧边界处关闭
    End,
    Skip,
}

fn classify(message: ProxyMessage) -> Step {
    match message {
        ProxyMessage::RelayNotification { name } => Step::Event(NotificationEvent { name }),
        ProxyMessage::ProxyDeath => {
            debug!("Notification proxy announced ProxyDeath");
            Step::End
        },
        ProxyMessage::Unknown { command } => {
            debug!("Skipping unknown notification proxy command {:?}", command);
            Step::Skip
        },
        other => {
            warn!("Skipping unexpected host-bound message {:?}", other);
            Step::Skip
        },
    }
}

/// 持锁读取一个时间片
///
/// - `Ok(Some(msg))`：读到完整消息
/// - `Ok(None)`：连接在帧边界处关闭
/// - `Err(Transport(Timeout))`：时间片内没有新帧，连接仍可用
fn read_slice<C: ServiceConnection>(
    conn: &Mutex<FramedConnection<C>>,
    max_frame: usize,
) -> Result<Option<ProxyMessage>, ServiceError> {
    let body = {
        let mut guard = conn.lock();
        let mut prefix = [0u8; NOTIFICATION_LENGTH_PREFIX];
        if !guard.begin_frame(&mut prefix)? {
            return Ok(None);
        }
        let len = body_length(&prefix);
        if len > max_frame {
            guard.abandon_frame(format!("notification frame of {len} bytes exceeds {max_frame}"));
            return Err(ProtocolError::FrameTooLarge {
                len,
                limit: max_frame,
            }
            .into());
        }
        let mut body = vec![0u8; len];
        guard.finish_frame(&mut body)?;
        body
    };
    trace!("Received notification frame of {} bytes", body.len());
    // 帧已完整读出，消息体解析失败不影响后续帧
    Ok(Some(ProxyMessage::decode_body(&body)?))
}

fn listen_loop<C: ServiceConnection>(
    conn: Arc<Mutex<FramedConnection<C>>>,
    callback: Arc<dyn NotificationCallback>,
    is_running: Arc<AtomicBool>,
    max_frame: usize,
) {
    debug!("Notification listener started");
    loop {
        // Acquire: 与 stop_listening 的 Release 配对
        if !is_running.load(Ordering::Acquire) {
            trace!("Listener: is_running flag is false, exiting");
            break;
        }

        match read_slice(&conn, max_frame) {
            Ok(Some(message)) => match classify(message) {
                Step::Event(event) => callback.on_notification(&event),
                Step::End => break,
                Step::Skip => {},
            },
            Ok(None) => {
                debug!("Listener: connection closed by device");
                break;
            },
            Err(ServiceError::Transport(TransportError::Timeout)) => continue,
            Err(e) if e.kind() == ErrorKind::Decode => {
                warn!("Listener: dropping undecodable notification: {}", e);
            },
            Err(e) => {
                error!("Listener: fatal receive error: {}", e);
                break;
            },
        }
    }
    is_running.store(false, Ordering::Release);
    debug!("Notification listener stopped");
}

struct Listener {
    is_running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// ============================================================================
// Client
// ============================================================================

/// 通知代理客户端
///
/// 所有方法只需 `&self`，可以用 `Arc` 在线程间共享。
pub struct NotificationProxyClient<C: ServiceConnection + 'static> {
    conn: Arc<Mutex<FramedConnection<C>>>,
    observed: Mutex<BTreeSet<String>>,
    listener: Mutex<Option<Listener>>,
    config: ClientConfig,
}

impl<C: ServiceConnection + 'static> NotificationProxyClient<C> {
    pub fn new(conn: C) -> Result<Self, ServiceError> {
        Self::with_config(conn, ClientConfig::default())
    }

    pub fn with_config(conn: C, config: ClientConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let mut framed = FramedConnection::with_frame_timeout(conn, config.frame_timeout());
        framed.set_receive_timeout(Some(config.receive_timeout()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(framed)),
            observed: Mutex::new(BTreeSet::new()),
            listener: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn check_name(name: &str) -> Result<(), ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "notification name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn send_frames(&self, buf: &[u8]) -> Result<(), ServiceError> {
        self.conn.lock().send(buf).map_err(|e| {
            let err = ServiceError::from(e);
            warn!(
                "Notification proxy send failed (np status {}): {}",
                err.np_status().code(),
                err
            );
            err
        })
    }

    /// 向设备发送通知
    ///
    /// 只保证请求已写出，不等待设备处理。
    pub fn post(&self, name: &str) -> Result<(), ServiceError> {
        Self::check_name(name)?;
        let mut buf = BytesMut::new();
        ProxyMessage::PostNotification {
            name: name.to_string(),
        }
        .encode_frame(&mut buf)?;
        self.send_frames(&buf)?;
        debug!("Posted notification {}", name);
        Ok(())
    }

    /// 订阅单个通知名（幂等）
    pub fn observe(&self, name: &str) -> Result<(), ServiceError> {
        self.observe_many(&[name])
    }

    /// 一次性订阅多个通知名
    ///
    /// 所有帧先全部编码，再一次写出；任何一步失败，本地订阅集合保持不变。
    pub fn observe_many<S: AsRef<str>>(&self, names: &[S]) -> Result<(), ServiceError> {
        if names.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "observe_many requires at least one name".to_string(),
            ));
        }
        for name in names {
            Self::check_name(name.as_ref())?;
        }

        let mut observed = self.observed.lock();
        let mut fresh: Vec<&str> = Vec::new();
        for name in names.iter().map(AsRef::as_ref) {
            if !observed.contains(name) && !fresh.contains(&name) {
                fresh.push(name);
            }
        }
        if fresh.is_empty() {
            trace!("All {} names already observed", names.len());
            return Ok(());
        }

        let mut buf = BytesMut::new();
        for name in &fresh {
            ProxyMessage::ObserveNotification {
                name: name.to_string(),
            }
            .encode_frame(&mut buf)?;
        }
        self.send_frames(&buf)?;

        observed.extend(fresh.iter().map(|s| s.to_string()));
        debug!("Observing {:?}", fresh);
        Ok(())
    }

    /// 当前已订阅的通知名快照
    pub fn observed(&self) -> Vec<String> {
        self.observed.lock().iter().cloned().collect()
    }

    fn ensure_not_listening(&self) -> Result<(), ServiceError> {
        if self.is_listening() {
            return Err(ServiceError::State(
                "a listener owns the read side of this connection".to_string(),
            ));
        }
        Ok(())
    }

    /// 阻塞直到收到一个事件；连接结束时返回 `None`
    pub fn poll_once(&self) -> Result<Option<NotificationEvent>, ServiceError> {
        self.poll_until(None)
    }

    /// 与 `poll_once` 相同，但最多等待 `timeout`
    ///
    /// 超时返回 `ErrorKind::Timeout`，连接保持可用。
    pub fn poll_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<NotificationEvent>, ServiceError> {
        self.poll_until(Some(Instant::now() + timeout))
    }

    fn poll_until(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Option<NotificationEvent>, ServiceError> {
        self.ensure_not_listening()?;
        loop {
            match read_slice(&self.conn, self.config.max_notification_frame) {
                Ok(Some(message)) => match classify(message) {
                    Step::Event(event) => return Ok(Some(event)),
                    Step::End => return Ok(None),
                    Step::Skip => {},
                },
                Ok(None) => return Ok(None),
                Err(ServiceError::Transport(TransportError::Timeout)) => {},
                Err(e) => return Err(e),
            }
            // 持续到来的无关帧同样不能让等待越过截止时间
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TransportError::Timeout.into());
            }
        }
    }

    /// 启动后台监听线程
    ///
    /// 同一时刻只允许一个监听线程；已结束（连接关闭）的监听线程会被回收。
    pub fn listen(&self, callback: Arc<dyn NotificationCallback>) -> Result<(), ServiceError> {
        let mut slot = self.listener.lock();
        if let Some(listener) = slot.as_ref() {
            if listener.is_running.load(Ordering::Acquire) {
                return Err(ServiceError::State("listener already active".to_string()));
            }
            if let Some(finished) = slot.take()
                && finished.handle.join().is_err()
            {
                error!("Previous notification listener panicked");
            }
        }

        let is_running = Arc::new(AtomicBool::new(true));
        let conn = self.conn.clone();
        let running = is_running.clone();
        let max_frame = self.config.max_notification_frame;
        let handle = thread::Builder::new()
            .name("np-listener".to_string())
            .spawn(move || listen_loop(conn, callback, running, max_frame))
            .map_err(TransportError::from)?;

        *slot = Some(Listener { is_running, handle });
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|l| l.is_running.load(Ordering::Acquire))
    }

    /// 停止监听并等待线程完全退出（幂等）
    ///
    /// 正在执行的回调会先完成；最长等待一个接收时间片加回调耗时。
    pub fn stop_listening(&self) -> Result<(), ServiceError> {
        let Some(listener) = self.listener.lock().take() else {
            return Ok(());
        };
        if listener.handle.thread().id() == thread::current().id() {
            // 回调内部无法等待自身退出；放回并只发出停止信号
            listener.is_running.store(false, Ordering::Release);
            *self.listener.lock() = Some(listener);
            return Err(ServiceError::State(
                "stop_listening called from the listener's own callback".to_string(),
            ));
        }
        // Release: 保证监听线程看到 false 时之前的写入均可见
        listener.is_running.store(false, Ordering::Release);
        if listener.handle.join().is_err() {
            error!("Notification listener panicked");
        }
        Ok(())
    }

    /// 通知设备关闭代理，并排空剩余消息直到 `ProxyDeath` 或连接结束
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.stop_listening()?;

        let mut buf = BytesMut::new();
        ProxyMessage::Shutdown.encode_frame(&mut buf)?;
        self.send_frames(&buf)?;

        let deadline = Instant::now() + self.config.frame_timeout();
        loop {
            match read_slice(&self.conn, self.config.max_notification_frame) {
                Ok(Some(ProxyMessage::ProxyDeath)) | Ok(None) => break,
                Ok(Some(message)) => trace!("Draining {:?} during shutdown", message),
                Err(ServiceError::Transport(TransportError::Timeout)) => {
                    if Instant::now() >= deadline {
                        warn!("Device did not acknowledge shutdown within {:?}", self.config.frame_timeout());
                        break;
                    }
                },
                Err(e) if e.kind() == ErrorKind::Decode => {},
                Err(e) => return Err(e),
            }
        }
        self.observed.lock().clear();
        self.conn.lock().shutdown()?;
        debug!("Notification proxy shut down");
        Ok(())
    }
}

impl<C: ServiceConnection + 'static> Drop for NotificationProxyClient<C> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_listening() {
            error!("Failed to stop notification listener on drop: {}", e);
        }
    }
}
