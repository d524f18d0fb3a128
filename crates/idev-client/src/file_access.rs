//! 文件访问服务客户端
//!
//! 严格的请求/响应协议：同一时刻只有一个未完成请求，响应按请求顺序返回。
//! 每个请求携带递增的 `packet_num`，响应必须回显同一数值，否则视为流失步，
//! 连接作废。
//!
//! 所有方法都需要 `&mut self`；跨线程共享时由调用方串行化（例如 `Mutex`）。

use crate::{ClientConfig, ServiceError};
use bytes::Bytes;
use idev_protocol::afc::{parse_key_value_list, parse_string_list};
use idev_protocol::{
    AFC_HEADER_LEN, DeviceInfo, FileHandle, FileInfo, LinkType, LockOperation, OpenMode, Packet,
    PacketHeader, ProtocolError, Request, Response, SeekWhence,
};
use idev_transport::{FramedConnection, ServiceConnection, TransportError};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// 已打开文件的本地记录（用于诊断）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub path: String,
    pub mode: OpenMode,
}

/// `truncate` 的目标：路径或已打开的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncateTarget {
    Path(String),
    Handle(FileHandle),
}

impl From<FileHandle> for TruncateTarget {
    fn from(handle: FileHandle) -> Self {
        TruncateTarget::Handle(handle)
    }
}

impl From<&str> for TruncateTarget {
    fn from(path: &str) -> Self {
        TruncateTarget::Path(path.to_string())
    }
}

impl From<String> for TruncateTarget {
    fn from(path: String) -> Self {
        TruncateTarget::Path(path)
    }
}

impl From<&String> for TruncateTarget {
    fn from(path: &String) -> Self {
        TruncateTarget::Path(path.clone())
    }
}

/// 把时间戳转换为服务使用的纳秒（Unix 纪元）
fn to_unix_nanos(time: SystemTime) -> Result<u64, ServiceError> {
    let since = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ServiceError::InvalidArgument("timestamp precedes the Unix epoch".into()))?;
    u64::try_from(since.as_nanos())
        .map_err(|_| ServiceError::InvalidArgument("timestamp out of range".into()))
}

fn check_path(path: &str) -> Result<(), ServiceError> {
    if path.is_empty() {
        return Err(ServiceError::InvalidArgument("path must not be empty".into()));
    }
    Ok(())
}

pub struct FileAccessClient<C: ServiceConnection> {
    conn: FramedConnection<C>,
    packet_num: u64,
    handles: HashMap<FileHandle, OpenFile>,
    config: ClientConfig,
}

impl<C: ServiceConnection> FileAccessClient<C> {
    pub fn new(conn: C) -> Result<Self, ServiceError> {
        Self::with_config(conn, ClientConfig::default())
    }

    pub fn with_config(conn: C, config: ClientConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let mut conn = FramedConnection::with_frame_timeout(conn, config.frame_timeout());
        conn.set_receive_timeout(Some(config.receive_timeout()))?;
        Ok(Self {
            conn,
            packet_num: 0,
            handles: HashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 连接是否已因帧错误作废
    pub fn is_poisoned(&self) -> bool {
        self.conn.is_poisoned()
    }

    // ========================================================================
    // 请求/响应
    // ========================================================================

    fn read_packet(&mut self) -> Result<Packet, ServiceError> {
        let mut raw = [0u8; AFC_HEADER_LEN];
        if !self.conn.await_frame(&mut raw)? {
            return Err(TransportError::Closed.into());
        }
        let header = match PacketHeader::decode(&raw) {
            Ok(header) => header,
            Err(e) => {
                self.conn.abandon_frame(format!("bad packet header: {e}"));
                return Err(e.into());
            },
        };
        let len = header.entire_length as usize;
        if len > self.config.max_packet_len {
            self.conn
                .abandon_frame(format!("packet of {len} bytes exceeds limit"));
            return Err(ProtocolError::FrameTooLarge {
                len,
                limit: self.config.max_packet_len,
            }
            .into());
        }
        let mut body = vec![0u8; header.body_len()];
        self.conn.finish_frame(&mut body)?;
        Ok(Packet::from_parts(header, Bytes::from(body))?)
    }

    /// 发送一个请求并等待其响应；非零状态码转换为错误
    fn request(&mut self, request: Request) -> Result<Response, ServiceError> {
        let operation = request.operation();
        let packet_num = self.packet_num;
        let bytes = request.into_packet()?.with_packet_num(packet_num).encode();
        if bytes.len() > self.config.max_packet_len {
            return Err(ServiceError::InvalidArgument(format!(
                "request of {} bytes exceeds max_packet_len",
                bytes.len()
            )));
        }
        self.packet_num = self.packet_num.wrapping_add(1);

        trace!("AFC -> {:?} #{} ({} bytes)", operation, packet_num, bytes.len());
        self.conn.send(&bytes)?;

        let reply = self.read_packet()?;
        if reply.packet_num != packet_num {
            let reason = format!(
                "response #{} does not match request #{packet_num}",
                reply.packet_num
            );
            self.conn.abandon_frame(reason.clone());
            return Err(ProtocolError::Decode(reason).into());
        }
        trace!("AFC <- {:?} #{}", reply.operation, reply.packet_num);

        match Response::from_packet(reply)? {
            Response::Status(0) => Ok(Response::Status(0)),
            Response::Status(code) => {
                debug!("{:?} failed with status {}", operation, code);
                Err(ServiceError::afc(code, operation))
            },
            other => Ok(other),
        }
    }

    fn request_ok(&mut self, request: Request) -> Result<(), ServiceError> {
        self.request(request).map(|_| ())
    }

    fn request_data(&mut self, request: Request) -> Result<Bytes, ServiceError> {
        match self.request(request)? {
            Response::Data(data) => Ok(data),
            // 无内容时部分设备只回成功状态
            Response::Status(_) => Ok(Bytes::new()),
            other => Err(ProtocolError::Decode(format!("expected data, got {other:?}")).into()),
        }
    }

    fn open_file(&self, handle: FileHandle) -> Result<&OpenFile, ServiceError> {
        self.handles
            .get(&handle)
            .ok_or_else(|| ServiceError::State(format!("file handle {handle} is not open")))
    }

    fn readable_file(&self, handle: FileHandle) -> Result<&OpenFile, ServiceError> {
        let file = self.open_file(handle)?;
        if !file.mode.is_readable() {
            return Err(ServiceError::State(format!(
                "file handle {handle} was opened {:?}",
                file.mode
            )));
        }
        Ok(file)
    }

    fn writable_file(&self, handle: FileHandle) -> Result<&OpenFile, ServiceError> {
        let file = self.open_file(handle)?;
        if !file.mode.is_writable() {
            return Err(ServiceError::State(format!(
                "file handle {handle} was opened {:?}",
                file.mode
            )));
        }
        Ok(file)
    }

    // ========================================================================
    // 元数据
    // ========================================================================

    /// 文件系统级信息（型号、容量、块大小）
    pub fn device_info(&mut self) -> Result<DeviceInfo, ServiceError> {
        let data = self.request_data(Request::GetDeviceInfo)?;
        Ok(DeviceInfo::from_pairs(parse_key_value_list(&data)?)?)
    }

    /// 单个设备信息字段
    pub fn device_info_value(&mut self, key: &str) -> Result<String, ServiceError> {
        let info = self.device_info()?;
        info.get(key)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::NotFound(format!("device info key {key:?}")))
    }

    /// 目录项（含 `.` 与 `..`），保持设备给出的顺序
    pub fn read_directory(&mut self, path: &str) -> Result<Vec<String>, ServiceError> {
        check_path(path)?;
        let data = self.request_data(Request::ReadDir {
            path: path.to_string(),
        })?;
        Ok(parse_string_list(&data)?)
    }

    pub fn file_info(&mut self, path: &str) -> Result<FileInfo, ServiceError> {
        check_path(path)?;
        let data = self.request_data(Request::GetFileInfo {
            path: path.to_string(),
        })?;
        Ok(FileInfo::from_pairs(parse_key_value_list(&data)?))
    }

    // ========================================================================
    // 路径操作
    // ========================================================================

    pub fn make_directory(&mut self, path: &str) -> Result<(), ServiceError> {
        check_path(path)?;
        self.request_ok(Request::MakeDir {
            path: path.to_string(),
        })
    }

    /// 删除文件、空目录或链接（非递归）
    pub fn remove_path(&mut self, path: &str) -> Result<(), ServiceError> {
        check_path(path)?;
        self.request_ok(Request::RemovePath {
            path: path.to_string(),
        })
    }

    pub fn rename_path(&mut self, from: &str, to: &str) -> Result<(), ServiceError> {
        check_path(from)?;
        check_path(to)?;
        self.request_ok(Request::RenamePath {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn symlink(&mut self, target: &str, link: &str) -> Result<(), ServiceError> {
        self.make_link(LinkType::Symbolic, target, link)
    }

    /// 创建硬链接
    ///
    /// 设备端行为未经充分验证，错误语义不保证与 `symlink` 一致。
    pub fn hardlink(&mut self, target: &str, link: &str) -> Result<(), ServiceError> {
        self.make_link(LinkType::Hard, target, link)
    }

    fn make_link(&mut self, kind: LinkType, target: &str, link: &str) -> Result<(), ServiceError> {
        check_path(target)?;
        check_path(link)?;
        self.request_ok(Request::MakeLink {
            kind,
            target: target.to_string(),
            link: link.to_string(),
        })
    }

    /// 截断路径或已打开的文件
    pub fn truncate(
        &mut self,
        target: impl Into<TruncateTarget>,
        len: u64,
    ) -> Result<(), ServiceError> {
        match target.into() {
            TruncateTarget::Path(path) => {
                check_path(&path)?;
                self.request_ok(Request::Truncate { path, size: len })
            },
            TruncateTarget::Handle(handle) => {
                self.writable_file(handle)?;
                self.request_ok(Request::FileSetSize { handle, size: len })
            },
        }
    }

    pub fn set_file_time(&mut self, path: &str, mtime: SystemTime) -> Result<(), ServiceError> {
        check_path(path)?;
        let mtime_ns = to_unix_nanos(mtime)?;
        self.request_ok(Request::SetFileTime {
            path: path.to_string(),
            mtime_ns,
        })
    }

    // ========================================================================
    // 文件句柄
    // ========================================================================

    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, ServiceError> {
        check_path(path)?;
        let handle = match self.request(Request::FileOpen {
            mode,
            path: path.to_string(),
        })? {
            Response::FileHandle(handle) => handle,
            other => {
                return Err(
                    ProtocolError::Decode(format!("expected file handle, got {other:?}")).into(),
                );
            },
        };
        debug!("Opened {} as {} ({:?})", path, handle, mode);
        self.handles.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                mode,
            },
        );
        Ok(handle)
    }

    /// 最多读取 `max_bytes` 字节；空结果表示文件结束
    ///
    /// 单次请求不超过 `max_read_chunk`。只写句柄直接返回 `State` 错误。
    pub fn read(&mut self, handle: FileHandle, max_bytes: usize) -> Result<Vec<u8>, ServiceError> {
        self.readable_file(handle)?;
        if max_bytes == 0 {
            return Ok(Vec::new());
        }
        let len = max_bytes.min(self.config.max_read_chunk) as u64;
        let data = self.request_data(Request::FileRead { handle, len })?;
        if data.len() as u64 > len {
            return Err(ProtocolError::Decode(format!(
                "device returned {} bytes for a {len}-byte read",
                data.len()
            ))
            .into());
        }
        Ok(data.to_vec())
    }

    /// 写入一部分数据，返回实际写入的字节数
    ///
    /// 单次请求不超过 `max_write_chunk`，调用方根据返回值继续写入剩余部分。
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize, ServiceError> {
        self.writable_file(handle)?;
        if data.is_empty() {
            return Ok(0);
        }
        let n = data.len().min(self.config.max_write_chunk);
        self.request_ok(Request::FileWrite {
            handle,
            data: Bytes::copy_from_slice(&data[..n]),
        })?;
        Ok(n)
    }

    /// 循环写入直到全部完成
    pub fn write_all(&mut self, handle: FileHandle, mut data: &[u8]) -> Result<(), ServiceError> {
        self.writable_file(handle)?;
        while !data.is_empty() {
            let n = self.write(handle, data)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// 移动读写位置，返回新位置
    pub fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> Result<u64, ServiceError> {
        self.open_file(handle)?;
        let (whence, offset) = match pos {
            SeekFrom::Start(offset) => (
                SeekWhence::Set,
                i64::try_from(offset)
                    .map_err(|_| ServiceError::InvalidArgument("seek offset too large".into()))?,
            ),
            SeekFrom::Current(offset) => (SeekWhence::Current, offset),
            SeekFrom::End(offset) => (SeekWhence::End, offset),
        };
        self.request_ok(Request::FileSeek {
            handle,
            whence,
            offset,
        })?;
        self.tell(handle)
    }

    pub fn tell(&mut self, handle: FileHandle) -> Result<u64, ServiceError> {
        self.open_file(handle)?;
        match self.request(Request::FileTell { handle })? {
            Response::Position(pos) => Ok(pos),
            other => Err(ProtocolError::Decode(format!("expected position, got {other:?}")).into()),
        }
    }

    /// 建议锁（flock 语义）
    pub fn lock(&mut self, handle: FileHandle, op: LockOperation) -> Result<(), ServiceError> {
        self.open_file(handle)?;
        self.request_ok(Request::FileLock { handle, op })
    }

    /// 关闭句柄
    ///
    /// 无论远端结果如何，句柄在本地都失效。
    pub fn close(&mut self, handle: FileHandle) -> Result<(), ServiceError> {
        let file = self
            .handles
            .remove(&handle)
            .ok_or_else(|| ServiceError::State(format!("file handle {handle} is not open")))?;
        debug!("Closing {} ({})", handle, file.path);
        self.request_ok(Request::FileClose { handle })
    }

    /// 当前打开的句柄（按句柄值排序）
    pub fn open_handles(&self) -> Vec<(FileHandle, OpenFile)> {
        let mut handles: Vec<_> = self
            .handles
            .iter()
            .map(|(h, f)| (*h, f.clone()))
            .collect();
        handles.sort_by_key(|(h, _)| h.raw());
        handles
    }

    // ========================================================================
    // 整文件传输
    // ========================================================================

    /// 读取整个文件
    pub fn get_file(&mut self, path: &str) -> Result<Vec<u8>, ServiceError> {
        let handle = self.open(path, OpenMode::ReadOnly)?;
        let mut out = Vec::new();
        let result = loop {
            match self.read(handle, self.config.max_read_chunk) {
                Ok(chunk) if chunk.is_empty() => break Ok(()),
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => break Err(e),
            }
        };
        self.finish_transfer(handle, result)?;
        Ok(out)
    }

    /// 创建或覆盖文件并写入全部内容
    pub fn put_file(&mut self, path: &str, data: &[u8]) -> Result<(), ServiceError> {
        let handle = self.open(path, OpenMode::WriteOnly)?;
        let result = self.write_all(handle, data);
        self.finish_transfer(handle, result)
    }

    /// 传输结束后关闭句柄；传输错误优先于关闭错误
    fn finish_transfer(
        &mut self,
        handle: FileHandle,
        result: Result<(), ServiceError>,
    ) -> Result<(), ServiceError> {
        let closed = if self.conn.is_poisoned() {
            self.handles.remove(&handle);
            Ok(())
        } else {
            self.close(handle)
        };
        result.and(closed)
    }
}

impl<C: ServiceConnection> Drop for FileAccessClient<C> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            // 连接可能已损坏，不隐式发送关闭请求
            for (handle, file) in self.open_handles() {
                warn!("File handle {} ({}) still open on drop", handle, file.path);
            }
        }
    }
}
