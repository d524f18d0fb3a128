//! 客户端配置
//!
//! 纯数据（POD），可从 TOML 加载；缺省字段取默认值，未知字段报错。
//!
//! ```toml
//! receive_timeout_ms = 50
//! max_read_chunk = 131072
//! ```

use crate::ServiceError;
use idev_protocol::AFC_HEADER_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 写请求在包头之后携带的句柄字段长度
const WRITE_HANDLE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// 监听线程每次持锁等待的时长（毫秒）
    ///
    /// 每个时间片结束后释放连接锁，使 `post` 等写操作可以穿插进行。
    pub receive_timeout_ms: u64,

    /// 帧开始后读完整帧的最长时间（毫秒），超时则连接作废
    pub frame_timeout_ms: u64,

    /// 通知帧消息体上限（字节）
    pub max_notification_frame: usize,

    /// 单次 `read` 请求的最大字节数
    pub max_read_chunk: usize,

    /// 单次 `write` 请求的最大字节数
    pub max_write_chunk: usize,

    /// 文件访问数据包上限（字节）
    pub max_packet_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 100,
            frame_timeout_ms: 5000,
            max_notification_frame: 1024 * 1024,
            max_read_chunk: 64 * 1024,
            max_write_chunk: 32 * 1024,
            max_packet_len: 16 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ServiceError> {
        let config: Self = toml::from_str(s)
            .map_err(|e| ServiceError::InvalidArgument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ServiceError> {
        let checks = [
            ("receive_timeout_ms", self.receive_timeout_ms as usize),
            ("frame_timeout_ms", self.frame_timeout_ms as usize),
            ("max_notification_frame", self.max_notification_frame),
            ("max_read_chunk", self.max_read_chunk),
            ("max_write_chunk", self.max_write_chunk),
            ("max_packet_len", self.max_packet_len),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| *v == 0) {
            return Err(ServiceError::InvalidArgument(format!(
                "{name} must be greater than zero"
            )));
        }
        // 整块读写连同包头都必须放得进一个数据包
        if self.max_read_chunk.saturating_add(AFC_HEADER_LEN) > self.max_packet_len {
            return Err(ServiceError::InvalidArgument(format!(
                "max_read_chunk plus the {AFC_HEADER_LEN}-byte header exceeds max_packet_len"
            )));
        }
        let write_overhead = AFC_HEADER_LEN + WRITE_HANDLE_LEN;
        if self.max_write_chunk.saturating_add(write_overhead) > self.max_packet_len {
            return Err(ServiceError::InvalidArgument(format!(
                "max_write_chunk plus {write_overhead} bytes of headers exceeds max_packet_len"
            )));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}
