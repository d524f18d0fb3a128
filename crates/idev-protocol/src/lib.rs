//! # idev Protocol
//!
//! 设备服务协议层定义（无 I/O 依赖）
//!
//! ## 模块
//!
//! - `notification`: 通知代理（notification proxy）帧编解码
//! - `afc`: 文件访问服务（file access）数据包编解码
//! - `status`: 远端状态码表与错误分类映射（ErrorMapper）
//! - `info`: `FileInfo` / `DeviceInfo` 元数据
//! - `names`: 已知通知名与服务名常量
//!
//! ## 字节序
//!
//! - 通知代理帧长度前缀使用大端（network order）
//! - 文件访问数据包头与所有整数参数使用小端

pub mod afc;
pub mod info;
pub mod names;
pub mod notification;
pub mod status;

// 重新导出常用类型
pub use afc::{
    AFC_HEADER_LEN, AFC_MAGIC, FileHandle, LinkType, LockOperation, OpenMode, Operation, Packet,
    PacketHeader, Request, Response, SeekWhence,
};
pub use info::{DeviceInfo, FileInfo, FileType};
pub use notification::{NOTIFICATION_LENGTH_PREFIX, ProxyMessage};
pub use status::{AfcStatus, ErrorKind, NpStatus};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 声明长度与实际可用字节数不一致
    #[error("Framing error: declared length {declared}, available {available}")]
    Framing { declared: usize, available: usize },

    #[error("Invalid packet magic: {0:02X?}")]
    InvalidMagic([u8; 8]),

    #[error("Frame too large: {len} bytes (limit {limit})")]
    FrameTooLarge { len: usize, limit: usize },

    /// 消息体无法解析为期望的结构
    #[error("Decode error: {0}")]
    Decode(String),

    /// 消息体无法编码
    #[error("Encode error: {0}")]
    Encode(String),

    /// 路径无法放入请求（如含 NUL）
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Unknown operation: 0x{0:X}")]
    UnknownOperation(u64),
}

impl ProtocolError {
    /// 映射到统一错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Framing { .. }
            | ProtocolError::InvalidMagic(_)
            | ProtocolError::FrameTooLarge { .. } => ErrorKind::Framing,
            ProtocolError::Decode(_) | ProtocolError::UnknownOperation(_) => ErrorKind::Decode,
            ProtocolError::Encode(_) => ErrorKind::PayloadError,
            ProtocolError::InvalidPath(_) => ErrorKind::InvalidArgument,
        }
    }
}

impl From<plist::Error> for ProtocolError {
    fn from(e: plist::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}
