//! 集成测试共享的设备替身
//!
//! - [`FakeProxy`]: 通知代理设备端（记录主机消息，按订阅转发设备端通知）
//! - [`FakeAfc`]: 文件访问设备端（内存文件系统）
//!
//! 二者都在独立线程上通过 `mock::duplex` 与客户端通信。

#![allow(dead_code)]

use bytes::BytesMut;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use idev_protocol::afc::{encode_key_value_list, encode_string_list};
use idev_protocol::notification::body_length;
use idev_protocol::{
    AFC_HEADER_LEN, AfcStatus, FileHandle, NOTIFICATION_LENGTH_PREFIX, Operation, Packet,
    PacketHeader, ProxyMessage, Response,
};
use idev_transport::mock::{MockConnection, duplex};
use idev_transport::{FramedConnection, TransportError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ============================================================================
// Notification proxy
// ============================================================================

enum Control {
    /// 设备端发出通知（仅当主机已订阅时转发）
    Post(String),
    /// 原样写出字节
    Raw(Vec<u8>),
    /// 关闭连接
    Close,
}

pub struct FakeProxy {
    control: Sender<Control>,
    received: Arc<Mutex<Vec<ProxyMessage>>>,
    handle: Option<JoinHandle<()>>,
}

pub fn proxy_frame(message: &ProxyMessage) -> Vec<u8> {
    let mut buf = BytesMut::new();
    message.encode_frame(&mut buf).unwrap();
    buf.to_vec()
}

/// 读取主机发来的所有已到达帧；连接结束或收到 Shutdown 时返回 false
fn drain_host(
    conn: &mut FramedConnection<MockConnection>,
    observed: &mut BTreeSet<String>,
    received: &Mutex<Vec<ProxyMessage>>,
) -> bool {
    loop {
        let mut prefix = [0u8; NOTIFICATION_LENGTH_PREFIX];
        match conn.begin_frame(&mut prefix) {
            Ok(true) => {},
            Ok(false) => return false,
            Err(TransportError::Timeout) => return true,
            Err(_) => return false,
        }
        let mut body = vec![0u8; body_length(&prefix)];
        if conn.finish_frame(&mut body).is_err() {
            return false;
        }
        let Ok(message) = ProxyMessage::decode_body(&body) else {
            continue;
        };
        received.lock().push(message.clone());
        match message {
            ProxyMessage::ObserveNotification { name } => {
                observed.insert(name);
            },
            ProxyMessage::Shutdown => {
                let _ = conn.send(&proxy_frame(&ProxyMessage::ProxyDeath));
                return false;
            },
            _ => {},
        }
    }
}

impl FakeProxy {
    /// 启动设备端线程，返回主机端连接
    pub fn spawn() -> (Self, MockConnection) {
        let (host, device) = duplex();
        let (control, control_rx): (Sender<Control>, Receiver<Control>) = unbounded();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        let handle = thread::spawn(move || {
            let mut conn = FramedConnection::new(device);
            conn.set_receive_timeout(Some(Duration::from_millis(1)))
                .unwrap();
            let mut observed = BTreeSet::new();
            loop {
                if !drain_host(&mut conn, &mut observed, &log) {
                    break;
                }
                match control_rx.recv_timeout(Duration::from_millis(5)) {
                    Ok(control) => {
                        // 控制命令晚于其之前写出的主机帧，先处理这些帧
                        if !drain_host(&mut conn, &mut observed, &log) {
                            break;
                        }
                        match control {
                            Control::Post(name) => {
                                if observed.contains(&name) {
                                    let relay = ProxyMessage::RelayNotification { name };
                                    if conn.send(&proxy_frame(&relay)).is_err() {
                                        break;
                                    }
                                }
                            },
                            Control::Raw(bytes) => {
                                if conn.send(&bytes).is_err() {
                                    break;
                                }
                            },
                            Control::Close => break,
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => {},
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = conn.shutdown();
        });

        (
            Self {
                control,
                received,
                handle: Some(handle),
            },
            host,
        )
    }

    pub fn post(&self, name: &str) {
        let _ = self.control.send(Control::Post(name.to_string()));
    }

    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.control.send(Control::Raw(bytes));
    }

    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    pub fn received(&self) -> Vec<ProxyMessage> {
        self.received.lock().clone()
    }

    /// 等待设备端收到至少 `n` 条主机消息
    pub fn wait_received(&self, n: usize) -> Vec<ProxyMessage> {
        wait_until(Duration::from_secs(2), || self.received.lock().len() >= n);
        self.received()
    }

    pub fn join(mut self) {
        let _ = self.control.send(Control::Close);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

// ============================================================================
// File access
// ============================================================================

pub const MODEL: &str = "iPhone10,6";
pub const TOTAL_BYTES: u64 = 255_989_469_184;
pub const FREE_BYTES: u64 = 113_045_729_280;
pub const BLOCK_SIZE: u64 = 4096;

/// 设备端单次读取上限（小于客户端默认分块，用于验证短读）
pub const DEVICE_READ_LIMIT: usize = 48 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub mtime_ns: u64,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            mtime_ns: 1_700_000_000_000_000_000,
        }
    }
}

/// 内存文件系统（键为规范化绝对路径）
#[derive(Debug, Clone)]
pub struct FakeFs {
    pub nodes: BTreeMap<String, Node>,
}

impl Default for FakeFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(NodeKind::Dir));
        Self { nodes }
    }
}

pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

type Status = AfcStatus;

impl FakeFs {
    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.nodes
            .insert(normalize(path), Node::new(NodeKind::File(data.to_vec())));
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.nodes.insert(normalize(path), Node::new(NodeKind::Dir));
        self
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .keys()
            .filter(|k| k.as_str() != dir && k.starts_with(&prefix))
            .filter(|k| !k[prefix.len()..].contains('/'))
            .map(|k| k[prefix.len()..].to_string())
            .collect()
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        matches!(
            self.nodes.get(&parent_of(path)).map(|n| &n.kind),
            Some(NodeKind::Dir)
        )
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>, Status> {
        match self.nodes.get(path).map(|n| &n.kind) {
            None => Err(Status::ObjectNotFound),
            Some(NodeKind::Dir) => {
                let mut entries = vec![".".to_string(), "..".to_string()];
                entries.extend(self.children(path));
                Ok(entries)
            },
            Some(_) => Err(Status::ReadError),
        }
    }

    fn info(&self, path: &str) -> Result<Vec<(String, String)>, Status> {
        let node = self.nodes.get(path).ok_or(Status::ObjectNotFound)?;
        let (ifmt, size, nlink) = match &node.kind {
            NodeKind::Dir => ("S_IFDIR", 64 * (self.children(path).len() as u64 + 2), 2),
            NodeKind::File(data) => ("S_IFREG", data.len() as u64, 1),
            NodeKind::Symlink(target) => ("S_IFLNK", target.len() as u64, 1),
        };
        let mut pairs = vec![
            ("st_size".to_string(), size.to_string()),
            ("st_blocks".to_string(), size.div_ceil(512).to_string()),
            ("st_nlink".to_string(), nlink.to_string()),
            ("st_ifmt".to_string(), ifmt.to_string()),
            ("st_mtime".to_string(), node.mtime_ns.to_string()),
            ("st_birthtime".to_string(), "1600000000000000000".to_string()),
        ];
        if let NodeKind::Symlink(target) = &node.kind {
            pairs.push(("LinkTarget".to_string(), target.clone()));
        }
        Ok(pairs)
    }

    fn create(&mut self, path: &str, kind: NodeKind) -> Result<(), Status> {
        if self.nodes.contains_key(path) {
            return Err(Status::ObjectExists);
        }
        if !self.parent_is_dir(path) {
            return Err(Status::ObjectNotFound);
        }
        self.nodes.insert(path.to_string(), Node::new(kind));
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), Status> {
        let node = self.nodes.get(path).ok_or(Status::ObjectNotFound)?;
        if node.kind == NodeKind::Dir && !self.children(path).is_empty() {
            return Err(Status::DirNotEmpty);
        }
        if path == "/" {
            return Err(Status::PermDenied);
        }
        self.nodes.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Status> {
        if !self.nodes.contains_key(from) {
            return Err(Status::ObjectNotFound);
        }
        if !self.parent_is_dir(to) {
            return Err(Status::ObjectNotFound);
        }
        let prefix = format!("{from}/");
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| k.as_str() == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn file_data(&mut self, path: &str) -> Result<&mut Vec<u8>, Status> {
        match self.nodes.get_mut(path).map(|n| &mut n.kind) {
            None => Err(Status::ObjectNotFound),
            Some(NodeKind::File(data)) => Ok(data),
            Some(NodeKind::Dir) => Err(Status::ObjectIsDir),
            Some(NodeKind::Symlink(_)) => Err(Status::InvalidArg),
        }
    }
}

/// 注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// 响应回显错误的 packet_num
    WrongPacketNum,
    /// 只写出半个响应后关闭连接
    TruncatedReply,
    /// 收到请求后不响应
    Silent,
}

struct OpenState {
    path: String,
    pos: usize,
    append: bool,
}

struct AfcServer {
    fs: Arc<Mutex<FakeFs>>,
    handles: HashMap<u64, OpenState>,
    next_handle: u64,
    requests: Arc<Mutex<Vec<Operation>>>,
}

fn hdr_u64(hdr: &[u8], index: usize) -> u64 {
    let start = index * 8;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&hdr[start..start + 8]);
    u64::from_le_bytes(raw)
}

fn hdr_paths(data: &[u8]) -> Vec<String> {
    data.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

impl AfcServer {
    fn handle(&mut self, packet: &Packet) -> Result<Response, Status> {
        let hdr = &packet.header_data[..];
        self.requests.lock().push(packet.operation);
        let mut fs = self.fs.lock();
        match packet.operation {
            Operation::GetDevInfo => Ok(Response::Data(encode_key_value_list(&[
                ("Model", MODEL.to_string()),
                ("FSTotalBytes", TOTAL_BYTES.to_string()),
                ("FSFreeBytes", FREE_BYTES.to_string()),
                ("FSBlockSize", BLOCK_SIZE.to_string()),
            ]))),
            Operation::ReadDir => {
                let path = normalize(&hdr_paths(hdr)[0]);
                Ok(Response::Data(encode_string_list(&fs.read_dir(&path)?)))
            },
            Operation::GetFileInfo => {
                let path = normalize(&hdr_paths(hdr)[0]);
                Ok(Response::Data(encode_key_value_list(&fs.info(&path)?)))
            },
            Operation::MakeDir => {
                let path = normalize(&hdr_paths(hdr)[0]);
                fs.create(&path, NodeKind::Dir)?;
                Ok(Response::Status(0))
            },
            Operation::RemovePath => {
                let path = normalize(&hdr_paths(hdr)[0]);
                fs.remove(&path)?;
                Ok(Response::Status(0))
            },
            Operation::RenamePath => {
                let paths = hdr_paths(hdr);
                fs.rename(&normalize(&paths[0]), &normalize(&paths[1]))?;
                Ok(Response::Status(0))
            },
            Operation::MakeLink => {
                let kind = hdr_u64(hdr, 0);
                let paths = hdr_paths(&hdr[8..]);
                let (target, link) = (paths[0].clone(), normalize(&paths[1]));
                if kind == 2 {
                    fs.create(&link, NodeKind::Symlink(target))?;
                } else {
                    let source = fs.nodes.get(&normalize(&target)).cloned();
                    match source.map(|n| n.kind) {
                        None => return Err(Status::ObjectNotFound),
                        Some(NodeKind::Dir) => return Err(Status::ObjectIsDir),
                        Some(kind) => fs.create(&link, kind)?,
                    }
                }
                Ok(Response::Status(0))
            },
            Operation::Truncate => {
                let size = hdr_u64(hdr, 0) as usize;
                let path = normalize(&hdr_paths(&hdr[8..])[0]);
                fs.file_data(&path)?.resize(size, 0);
                Ok(Response::Status(0))
            },
            Operation::SetFileTime => {
                let mtime = hdr_u64(hdr, 0);
                let path = normalize(&hdr_paths(&hdr[8..])[0]);
                let node = fs.nodes.get_mut(&path).ok_or(Status::ObjectNotFound)?;
                node.mtime_ns = mtime;
                Ok(Response::Status(0))
            },
            Operation::FileOpen => {
                let mode = hdr_u64(hdr, 0);
                let path = normalize(&hdr_paths(&hdr[8..])[0]);
                match mode {
                    1 | 2 => {
                        fs.file_data(&path)?;
                    },
                    3..=6 => {
                        if !fs.nodes.contains_key(&path) {
                            fs.create(&path, NodeKind::File(Vec::new()))?;
                        }
                        let data = fs.file_data(&path)?;
                        if matches!(mode, 3 | 4) {
                            data.clear();
                        }
                    },
                    _ => return Err(Status::InvalidArg),
                }
                let id = self.next_handle;
                self.next_handle += 1;
                self.handles.insert(
                    id,
                    OpenState {
                        path,
                        pos: 0,
                        append: matches!(mode, 5 | 6),
                    },
                );
                Ok(Response::FileHandle(FileHandle::from_raw(id)))
            },
            Operation::FileRead => {
                let state = self
                    .handles
                    .get_mut(&hdr_u64(hdr, 0))
                    .ok_or(Status::InvalidArg)?;
                let len = (hdr_u64(hdr, 1) as usize).min(DEVICE_READ_LIMIT);
                let data = fs.file_data(&state.path)?;
                let start = state.pos.min(data.len());
                let end = (start + len).min(data.len());
                state.pos = end;
                Ok(Response::Data(data[start..end].to_vec().into()))
            },
            Operation::FileWrite => {
                let state = self
                    .handles
                    .get_mut(&hdr_u64(hdr, 0))
                    .ok_or(Status::InvalidArg)?;
                let data = fs.file_data(&state.path)?;
                if state.append {
                    state.pos = data.len();
                }
                let end = state.pos + packet.payload.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[state.pos..end].copy_from_slice(&packet.payload);
                state.pos = end;
                Ok(Response::Status(0))
            },
            Operation::FileSeek => {
                let state = self
                    .handles
                    .get_mut(&hdr_u64(hdr, 0))
                    .ok_or(Status::InvalidArg)?;
                let whence = hdr_u64(hdr, 1);
                let offset = hdr_u64(hdr, 2) as i64;
                let len = fs.file_data(&state.path)?.len() as i64;
                let base = match whence {
                    0 => 0,
                    1 => state.pos as i64,
                    2 => len,
                    _ => return Err(Status::InvalidArg),
                };
                let pos = base + offset;
                if pos < 0 {
                    return Err(Status::InvalidArg);
                }
                state.pos = pos as usize;
                Ok(Response::Status(0))
            },
            Operation::FileTell => {
                let state = self.handles.get(&hdr_u64(hdr, 0)).ok_or(Status::InvalidArg)?;
                Ok(Response::Position(state.pos as u64))
            },
            Operation::FileSetSize => {
                let state = self.handles.get(&hdr_u64(hdr, 0)).ok_or(Status::InvalidArg)?;
                let size = hdr_u64(hdr, 1) as usize;
                fs.file_data(&state.path)?.resize(size, 0);
                Ok(Response::Status(0))
            },
            Operation::FileLock => {
                self.handles.get(&hdr_u64(hdr, 0)).ok_or(Status::InvalidArg)?;
                Ok(Response::Status(0))
            },
            Operation::FileClose => {
                self.handles
                    .remove(&hdr_u64(hdr, 0))
                    .ok_or(Status::InvalidArg)?;
                Ok(Response::Status(0))
            },
            _ => Err(Status::UnknownPacketType),
        }
    }
}

fn read_request(conn: &mut FramedConnection<MockConnection>) -> Option<Packet> {
    let mut raw = [0u8; AFC_HEADER_LEN];
    if !conn.begin_frame(&mut raw).ok()? {
        return None;
    }
    let header = PacketHeader::decode(&raw).ok()?;
    let mut body = vec![0u8; header.body_len()];
    conn.finish_frame(&mut body).ok()?;
    Packet::from_parts(header, body.into()).ok()
}

pub struct FakeAfc {
    pub fs: Arc<Mutex<FakeFs>>,
    requests: Arc<Mutex<Vec<Operation>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeAfc {
    pub fn spawn(fs: FakeFs) -> (Self, MockConnection) {
        Self::spawn_with(fs, Fault::None)
    }

    pub fn spawn_with(fs: FakeFs, fault: Fault) -> (Self, MockConnection) {
        let (host, device) = duplex();
        let fs = Arc::new(Mutex::new(fs));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut server = AfcServer {
            fs: fs.clone(),
            handles: HashMap::new(),
            next_handle: 1,
            requests: requests.clone(),
        };

        let handle = thread::spawn(move || {
            let mut conn = FramedConnection::new(device);
            while let Some(packet) = read_request(&mut conn) {
                let response = match server.handle(&packet) {
                    Ok(response) => response,
                    Err(status) => Response::Status(u64::from(status)),
                };
                let packet_num = match fault {
                    Fault::WrongPacketNum => packet.packet_num + 100,
                    _ => packet.packet_num,
                };
                let reply = response.into_packet().with_packet_num(packet_num).encode();
                match fault {
                    Fault::Silent => {},
                    Fault::TruncatedReply => {
                        let cut = (AFC_HEADER_LEN + 2).min(reply.len() - 1);
                        let _ = conn.send(&reply[..cut]);
                        break;
                    },
                    _ => {
                        if conn.send(&reply).is_err() {
                            break;
                        }
                    },
                }
            }
            let _ = conn.shutdown();
        });

        (
            Self {
                fs,
                requests,
                handle: Some(handle),
            },
            host,
        )
    }

    /// 设备端收到的请求操作序列
    pub fn requests(&self) -> Vec<Operation> {
        self.requests.lock().clone()
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.fs.lock().nodes.get(&normalize(path)).cloned()
    }

    /// 等待设备线程退出（主机端连接需先被 drop）
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

pub fn status_code(status: AfcStatus) -> i64 {
    u64::from(status) as i64
}
