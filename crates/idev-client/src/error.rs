//! 客户端层错误类型定义

use idev_protocol::{ErrorKind, NpStatus, ProtocolError};
use idev_transport::TransportError;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ServiceError {
    /// 帧/消息体编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 底层连接错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 远端返回非成功状态码（保留原始数值）
    #[error("Remote error {kind:?} (code {code})")]
    Remote { kind: ErrorKind, code: i64 },

    /// 响应中缺少请求的字段
    #[error("Not found: {0}")]
    NotFound(String),

    /// 本地参数校验失败，未发出请求
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 本地误用（重复监听、已关闭句柄等）
    #[error("Invalid state: {0}")]
    State(String),
}

impl ServiceError {
    /// 映射到统一错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Protocol(e) => e.kind(),
            ServiceError::Transport(TransportError::Timeout) => ErrorKind::Timeout,
            ServiceError::Transport(_) => ErrorKind::ConnectionFailed,
            ServiceError::Remote { kind, .. } => *kind,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ServiceError::State(_) => ErrorKind::State,
        }
    }

    /// 远端原始状态码（仅 `Remote` 有值）
    pub fn code(&self) -> Option<i64> {
        match self {
            ServiceError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 按通知代理状态码表归类
    ///
    /// 通知代理的线上消息不带状态码，失败来自本地校验、编解码或连接，
    /// 这里把它们折算为设备端约定的 np 状态码（如连接失败为 -3）。
    pub fn np_status(&self) -> NpStatus {
        match self.kind() {
            ErrorKind::Success => NpStatus::Success,
            ErrorKind::InvalidArgument => NpStatus::InvalidArg,
            ErrorKind::PayloadError | ErrorKind::Decode => NpStatus::PlistError,
            ErrorKind::ConnectionFailed | ErrorKind::Timeout | ErrorKind::Framing => {
                NpStatus::ConnFailed
            },
            _ => NpStatus::Unknown,
        }
    }

    pub(crate) fn afc(code: u64, operation: idev_protocol::Operation) -> Self {
        ServiceError::Remote {
            kind: ErrorKind::from_afc(code, operation),
            code: i64::try_from(code).unwrap_or(i64::MAX),
        }
    }
}
