//! 远端状态码表与错误分类（ErrorMapper）
//!
//! 两个服务各自有一张状态码表：
//! - 通知代理：`NpStatus`（有符号，0 / -1 / -2 / -3 / -256）
//! - 文件访问：`AfcStatus`（无符号，0..=33，中间有空洞）
//!
//! 所有状态码最终映射到封闭的 [`ErrorKind`] 集合。
//! 不在文档表中的数值映射为 `ErrorKind::Unknown`，原始数值由调用方保留用于诊断。

use crate::afc::Operation;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 统一错误分类（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    InvalidArgument,
    /// 结构化消息体格式错误
    PayloadError,
    ConnectionFailed,
    NotEnoughData,
    PermissionDenied,
    NotFound,
    IsDirectory,
    NotDirectory,
    ObjectExists,
    DirectoryNotEmpty,
    /// 设备资源不足（内存、磁盘空间等）
    NoResources,
    /// 对象忙或操作需重试
    Busy,
    /// 设备端 I/O 失败
    Io,
    Timeout,
    Unsupported,
    /// 帧边界错误（长度前缀/魔数不符）
    Framing,
    /// 消息体无法解析
    Decode,
    /// 本地误用（重复监听、已关闭句柄等），不涉及远端
    State,
    /// 未知远端状态码
    Unknown,
}

impl ErrorKind {
    /// 是否为本地误用错误
    pub fn is_local_misuse(self) -> bool {
        self == ErrorKind::State
    }
}

// ============================================================================
// Notification Proxy 状态码
// ============================================================================

/// 通知代理状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum NpStatus {
    Success = 0,
    InvalidArg = -1,
    PlistError = -2,
    ConnFailed = -3,
    Unknown = -256,
}

impl NpStatus {
    pub fn code(self) -> i64 {
        i32::from(self) as i64
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            NpStatus::Success => ErrorKind::Success,
            NpStatus::InvalidArg => ErrorKind::InvalidArgument,
            NpStatus::PlistError => ErrorKind::PayloadError,
            NpStatus::ConnFailed => ErrorKind::ConnectionFailed,
            NpStatus::Unknown => ErrorKind::Unknown,
        }
    }
}

// ============================================================================
// File Access 状态码
// ============================================================================

/// 文件访问服务状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum AfcStatus {
    Success = 0,
    UnknownError = 1,
    OpHeaderInvalid = 2,
    NoResources = 3,
    ReadError = 4,
    WriteError = 5,
    UnknownPacketType = 6,
    InvalidArg = 7,
    ObjectNotFound = 8,
    ObjectIsDir = 9,
    PermDenied = 10,
    ServiceNotConnected = 11,
    OpTimeout = 12,
    TooMuchData = 13,
    EndOfData = 14,
    OpNotSupported = 15,
    ObjectExists = 16,
    ObjectBusy = 17,
    NoSpaceLeft = 18,
    OpWouldBlock = 19,
    IoError = 20,
    OpInterrupted = 21,
    OpInProgress = 22,
    InternalError = 23,
    MuxError = 30,
    NoMem = 31,
    NotEnoughData = 32,
    DirNotEmpty = 33,
}

impl AfcStatus {
    /// 从原始数值解析；不在表中返回 `None`
    pub fn from_code(code: u64) -> Option<Self> {
        Self::try_from(code).ok()
    }

    /// 与操作无关的基础映射
    pub fn kind(self) -> ErrorKind {
        match self {
            AfcStatus::Success => ErrorKind::Success,
            AfcStatus::UnknownError => ErrorKind::Unknown,
            AfcStatus::OpHeaderInvalid | AfcStatus::UnknownPacketType => ErrorKind::PayloadError,
            AfcStatus::NoResources | AfcStatus::NoSpaceLeft | AfcStatus::NoMem => {
                ErrorKind::NoResources
            },
            AfcStatus::ReadError
            | AfcStatus::WriteError
            | AfcStatus::IoError
            | AfcStatus::OpInterrupted
            | AfcStatus::InternalError => ErrorKind::Io,
            AfcStatus::InvalidArg | AfcStatus::TooMuchData => ErrorKind::InvalidArgument,
            AfcStatus::ObjectNotFound => ErrorKind::NotFound,
            AfcStatus::ObjectIsDir => ErrorKind::IsDirectory,
            AfcStatus::PermDenied => ErrorKind::PermissionDenied,
            AfcStatus::ServiceNotConnected | AfcStatus::MuxError => ErrorKind::ConnectionFailed,
            AfcStatus::OpTimeout => ErrorKind::Timeout,
            AfcStatus::EndOfData | AfcStatus::NotEnoughData => ErrorKind::NotEnoughData,
            AfcStatus::OpNotSupported => ErrorKind::Unsupported,
            AfcStatus::ObjectExists => ErrorKind::ObjectExists,
            AfcStatus::ObjectBusy | AfcStatus::OpWouldBlock | AfcStatus::OpInProgress => {
                ErrorKind::Busy
            },
            AfcStatus::DirNotEmpty => ErrorKind::DirectoryNotEmpty,
        }
    }
}

impl ErrorKind {
    /// 映射文件访问状态码（依赖触发该状态的操作）
    ///
    /// 设备对非目录路径执行 ReadDir 时返回 `ReadError`，这里映射为 `NotDirectory`；
    /// 其他操作中的 `ReadError` 仍视为 I/O 错误。
    pub fn from_afc(code: u64, operation: Operation) -> ErrorKind {
        match AfcStatus::from_code(code) {
            Some(AfcStatus::ReadError) if operation == Operation::ReadDir => {
                ErrorKind::NotDirectory
            },
            Some(status) => status.kind(),
            None => ErrorKind::Unknown,
        }
    }

    /// 映射通知代理状态码
    pub fn from_np(code: i32) -> ErrorKind {
        NpStatus::try_from(code)
            .map(NpStatus::kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}
