//! 文件访问服务（file access）数据包编解码
//!
//! # 数据包格式
//!
//! ```text
//! +----------+--------------+-------------+------------+-----------+-------------+---------+
//! | magic(8) | entire_len(8)| this_len(8) | packet_num | operation | header data | payload |
//! +----------+--------------+-------------+------------+-----------+-------------+---------+
//! |<------------------------- this_len ------------------------------------------>|
//! |<------------------------- entire_len ------------------------------------------------->|
//! ```
//!
//! - 所有整数字段为小端 `u64`
//! - header data：定长参数（句柄、模式、长度）以及 NUL 结尾的路径
//! - payload：写入的原始数据，或响应中的目录项 / 键值列表

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 数据包魔数
pub const AFC_MAGIC: &[u8; 8] = b"CFA6LPAA";

/// 数据包头长度（字节）
pub const AFC_HEADER_LEN: usize = 40;

// ============================================================================
// Operation Codes
// ============================================================================

/// 操作码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum Operation {
    // 设备 → 主机
    Status = 0x01,
    Data = 0x02,

    // 主机 → 设备
    ReadDir = 0x03,
    Truncate = 0x07,
    RemovePath = 0x08,
    MakeDir = 0x09,
    GetFileInfo = 0x0A,
    GetDevInfo = 0x0B,
    FileOpen = 0x0D,
    FileOpenResult = 0x0E,
    FileRead = 0x0F,
    FileWrite = 0x10,
    FileSeek = 0x11,
    FileTell = 0x12,
    FileTellResult = 0x13,
    FileClose = 0x14,
    FileSetSize = 0x15,
    RenamePath = 0x18,
    FileLock = 0x1B,
    MakeLink = 0x1C,
    SetFileTime = 0x1E,
}

// ============================================================================
// Parameter Enums
// ============================================================================

/// 文件打开模式（对应 fopen 模式字符串）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum OpenMode {
    /// `r`
    ReadOnly = 1,
    /// `r+`
    ReadWrite = 2,
    /// `w`（创建/截断）
    WriteOnly = 3,
    /// `w+`（创建/截断）
    WriteRead = 4,
    /// `a`
    Append = 5,
    /// `a+`
    ReadAppend = 6,
}

impl OpenMode {
    pub fn is_readable(self) -> bool {
        !matches!(self, OpenMode::WriteOnly | OpenMode::Append)
    }

    pub fn is_writable(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

/// 链接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum LinkType {
    Hard = 1,
    Symbolic = 2,
}

/// 文件锁操作（flock 语义，总是带非阻塞位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum LockOperation {
    Shared = 1 | 4,
    Exclusive = 2 | 4,
    Unlock = 8 | 4,
}

/// Seek 起点
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum SeekWhence {
    Set = 0,
    Current = 1,
    End = 2,
}

/// 服务分配的打开文件句柄（不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(u64);

impl FileHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Packet Header
// ============================================================================

/// 数据包头（40 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub entire_length: u64,
    pub this_length: u64,
    pub packet_num: u64,
    pub operation: Operation,
}

impl PacketHeader {
    /// 编码到缓冲区
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(AFC_HEADER_LEN);
        buf.put_slice(AFC_MAGIC);
        buf.put_u64_le(self.entire_length);
        buf.put_u64_le(self.this_length);
        buf.put_u64_le(self.packet_num);
        buf.put_u64_le(self.operation.into());
    }

    /// 从缓冲区解码，并校验长度字段的一致性
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < AFC_HEADER_LEN {
            return Err(ProtocolError::Framing {
                declared: AFC_HEADER_LEN,
                available: buf.len(),
            });
        }

        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if &magic != AFC_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let entire_length = buf.get_u64_le();
        let this_length = buf.get_u64_le();
        let packet_num = buf.get_u64_le();
        let raw_op = buf.get_u64_le();

        if this_length < AFC_HEADER_LEN as u64 || entire_length < this_length {
            return Err(ProtocolError::Framing {
                declared: this_length as usize,
                available: entire_length as usize,
            });
        }

        let operation =
            Operation::try_from(raw_op).map_err(|_| ProtocolError::UnknownOperation(raw_op))?;

        Ok(Self {
            entire_length,
            this_length,
            packet_num,
            operation,
        })
    }

    /// 包头之后的字节数（header data + payload）
    pub fn body_len(&self) -> usize {
        (self.entire_length as usize).saturating_sub(AFC_HEADER_LEN)
    }

    pub fn header_data_len(&self) -> usize {
        (self.this_length as usize).saturating_sub(AFC_HEADER_LEN)
    }
}

// ============================================================================
// Packet
// ============================================================================

/// 完整数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_num: u64,
    pub operation: Operation,
    pub header_data: Bytes,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(operation: Operation, header_data: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_num: 0,
            operation,
            header_data: header_data.into(),
            payload: payload.into(),
        }
    }

    pub fn with_packet_num(mut self, packet_num: u64) -> Self {
        self.packet_num = packet_num;
        self
    }

    pub fn header(&self) -> PacketHeader {
        let this_length = (AFC_HEADER_LEN + self.header_data.len()) as u64;
        PacketHeader {
            entire_length: this_length + self.payload.len() as u64,
            this_length,
            packet_num: self.packet_num,
            operation: self.operation,
        }
    }

    /// 编码为线上字节
    pub fn encode(&self) -> Bytes {
        let header = self.header();
        let mut buf = BytesMut::with_capacity(header.entire_length as usize);
        header.encode(&mut buf);
        buf.put_slice(&self.header_data);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 由已解码的包头和包体组装
    ///
    /// `body` 必须恰好是包头声明的剩余长度。
    pub fn from_parts(header: PacketHeader, mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.len() != header.body_len() {
            return Err(ProtocolError::Framing {
                declared: header.body_len(),
                available: body.len(),
            });
        }
        let header_data = body.split_to(header.header_data_len());
        Ok(Self {
            packet_num: header.packet_num,
            operation: header.operation,
            header_data,
            payload: body,
        })
    }

    /// 解码完整数据包（声明长度必须与输入长度一致）
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(bytes)?;
        if header.entire_length as usize != bytes.len() {
            return Err(ProtocolError::Framing {
                declared: header.entire_length as usize,
                available: bytes.len(),
            });
        }
        Self::from_parts(header, Bytes::copy_from_slice(&bytes[AFC_HEADER_LEN..]))
    }
}

// ============================================================================
// Requests
// ============================================================================

/// 主机请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetDeviceInfo,
    ReadDir { path: String },
    GetFileInfo { path: String },
    MakeDir { path: String },
    RemovePath { path: String },
    RenamePath { from: String, to: String },
    MakeLink { kind: LinkType, target: String, link: String },
    Truncate { path: String, size: u64 },
    SetFileTime { path: String, mtime_ns: u64 },
    FileOpen { mode: OpenMode, path: String },
    FileRead { handle: FileHandle, len: u64 },
    FileWrite { handle: FileHandle, data: Bytes },
    FileSeek { handle: FileHandle, whence: SeekWhence, offset: i64 },
    FileTell { handle: FileHandle },
    FileSetSize { handle: FileHandle, size: u64 },
    FileLock { handle: FileHandle, op: LockOperation },
    FileClose { handle: FileHandle },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::GetDeviceInfo => Operation::GetDevInfo,
            Request::ReadDir { .. } => Operation::ReadDir,
            Request::GetFileInfo { .. } => Operation::GetFileInfo,
            Request::MakeDir { .. } => Operation::MakeDir,
            Request::RemovePath { .. } => Operation::RemovePath,
            Request::RenamePath { .. } => Operation::RenamePath,
            Request::MakeLink { .. } => Operation::MakeLink,
            Request::Truncate { .. } => Operation::Truncate,
            Request::SetFileTime { .. } => Operation::SetFileTime,
            Request::FileOpen { .. } => Operation::FileOpen,
            Request::FileRead { .. } => Operation::FileRead,
            Request::FileWrite { .. } => Operation::FileWrite,
            Request::FileSeek { .. } => Operation::FileSeek,
            Request::FileTell { .. } => Operation::FileTell,
            Request::FileSetSize { .. } => Operation::FileSetSize,
            Request::FileLock { .. } => Operation::FileLock,
            Request::FileClose { .. } => Operation::FileClose,
        }
    }

    /// 构造数据包（packet_num 由调用方设置）
    pub fn into_packet(self) -> Result<Packet, ProtocolError> {
        let operation = self.operation();
        let mut hdr = BytesMut::new();
        let mut payload = Bytes::new();

        match self {
            Request::GetDeviceInfo => {},
            Request::ReadDir { path }
            | Request::GetFileInfo { path }
            | Request::MakeDir { path }
            | Request::RemovePath { path } => put_path(&mut hdr, &path)?,
            Request::RenamePath { from, to } => {
                put_path(&mut hdr, &from)?;
                put_path(&mut hdr, &to)?;
            },
            Request::MakeLink { kind, target, link } => {
                hdr.put_u64_le(kind.into());
                put_path(&mut hdr, &target)?;
                put_path(&mut hdr, &link)?;
            },
            Request::Truncate { path, size } => {
                hdr.put_u64_le(size);
                put_path(&mut hdr, &path)?;
            },
            Request::SetFileTime { path, mtime_ns } => {
                hdr.put_u64_le(mtime_ns);
                put_path(&mut hdr, &path)?;
            },
            Request::FileOpen { mode, path } => {
                hdr.put_u64_le(mode.into());
                put_path(&mut hdr, &path)?;
            },
            Request::FileRead { handle, len } => {
                hdr.put_u64_le(handle.raw());
                hdr.put_u64_le(len);
            },
            Request::FileWrite { handle, data } => {
                hdr.put_u64_le(handle.raw());
                payload = data;
            },
            Request::FileSeek {
                handle,
                whence,
                offset,
            } => {
                hdr.put_u64_le(handle.raw());
                hdr.put_u64_le(whence.into());
                hdr.put_i64_le(offset);
            },
            Request::FileSetSize { handle, size } => {
                hdr.put_u64_le(handle.raw());
                hdr.put_u64_le(size);
            },
            Request::FileLock { handle, op } => {
                hdr.put_u64_le(handle.raw());
                hdr.put_u64_le(op.into());
            },
            Request::FileTell { handle } | Request::FileClose { handle } => {
                hdr.put_u64_le(handle.raw());
            },
        }

        Ok(Packet::new(operation, hdr.freeze(), payload))
    }
}

fn put_path(buf: &mut BytesMut, path: &str) -> Result<(), ProtocolError> {
    if path.as_bytes().contains(&0) {
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }
    buf.put_slice(path.as_bytes());
    buf.put_u8(0);
    Ok(())
}

// ============================================================================
// Responses
// ============================================================================

/// 设备响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 状态码（0 表示成功）
    Status(u64),
    Data(Bytes),
    FileHandle(FileHandle),
    Position(u64),
}

impl Response {
    pub fn from_packet(packet: Packet) -> Result<Self, ProtocolError> {
        match packet.operation {
            Operation::Status => Ok(Response::Status(first_u64(&packet)?)),
            Operation::Data => Ok(Response::Data(packet.payload)),
            Operation::FileOpenResult => {
                Ok(Response::FileHandle(FileHandle::from_raw(first_u64(&packet)?)))
            },
            Operation::FileTellResult => Ok(Response::Position(first_u64(&packet)?)),
            other => Err(ProtocolError::Decode(format!(
                "unexpected response operation {other:?}"
            ))),
        }
    }

    /// 编码为数据包（设备端 / 测试替身使用）
    pub fn into_packet(self) -> Packet {
        match self {
            Response::Status(code) => {
                Packet::new(Operation::Status, code.to_le_bytes().to_vec(), Bytes::new())
            },
            Response::Data(data) => Packet::new(Operation::Data, Bytes::new(), data),
            Response::FileHandle(handle) => Packet::new(
                Operation::FileOpenResult,
                handle.raw().to_le_bytes().to_vec(),
                Bytes::new(),
            ),
            Response::Position(pos) => Packet::new(
                Operation::FileTellResult,
                pos.to_le_bytes().to_vec(),
                Bytes::new(),
            ),
        }
    }
}

fn first_u64(packet: &Packet) -> Result<u64, ProtocolError> {
    let mut data = &packet.header_data[..];
    if data.len() < 8 {
        // 部分设备把定长结果放在 payload 中
        data = &packet.payload[..];
    }
    if data.len() < 8 {
        return Err(ProtocolError::Decode(format!(
            "{:?} response carries {} bytes, expected 8",
            packet.operation,
            data.len()
        )));
    }
    Ok(data.get_u64_le())
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// 解析 NUL 分隔的字符串列表（目录项）
pub fn parse_string_list(data: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let data = data.strip_suffix(&[0]).unwrap_or(data);
    if data.is_empty() {
        return Ok(Vec::new());
    }
    data.split(|b| *b == 0)
        .map(|s| {
            String::from_utf8(s.to_vec())
                .map_err(|e| ProtocolError::Decode(format!("invalid UTF-8 entry: {e}")))
        })
        .collect()
}

/// 编码 NUL 分隔的字符串列表
pub fn encode_string_list<S: AsRef<str>>(items: &[S]) -> Bytes {
    let mut buf = BytesMut::new();
    for item in items {
        buf.put_slice(item.as_ref().as_bytes());
        buf.put_u8(0);
    }
    buf.freeze()
}

/// 解析扁平键值列表（`key\0value\0key\0value\0...`）
pub fn parse_key_value_list(data: &[u8]) -> Result<Vec<(String, String)>, ProtocolError> {
    let items = parse_string_list(data)?;
    if items.len() % 2 != 0 {
        return Err(ProtocolError::Decode(format!(
            "key/value list has odd number of items ({})",
            items.len()
        )));
    }
    let mut iter = items.into_iter();
    let mut pairs = Vec::new();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

/// 编码扁平键值列表
pub fn encode_key_value_list<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Bytes {
    let mut buf = BytesMut::new();
    for (k, v) in pairs {
        buf.put_slice(k.as_ref().as_bytes());
        buf.put_u8(0);
        buf.put_slice(v.as_ref().as_bytes());
        buf.put_u8(0);
    }
    buf.freeze()
}
