//! 通知代理（notification proxy）帧编解码
//!
//! # 帧格式
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| XML property list (length)|
//! +----------------+---------------------------+
//! ```
//!
//! 消息体是一个字典，`Command` 字段区分消息类型，`Name` 字段携带通知名。

use crate::ProtocolError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// 长度前缀字节数
pub const NOTIFICATION_LENGTH_PREFIX: usize = 4;

const CMD_POST: &str = "PostNotification";
const CMD_OBSERVE: &str = "ObserveNotification";
const CMD_RELAY: &str = "RelayNotification";
const CMD_SHUTDOWN: &str = "Shutdown";
const CMD_PROXY_DEATH: &str = "ProxyDeath";

/// 通知代理消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMessage {
    // 主机 → 设备
    PostNotification { name: String },
    ObserveNotification { name: String },
    Shutdown,

    // 设备 → 主机
    RelayNotification { name: String },
    ProxyDeath,

    /// 未识别的命令（设备可能新增命令，调用方记录后跳过）
    Unknown { command: String },
}

/// 线上字典的原始形态
#[derive(Debug, Serialize, Deserialize)]
struct RawMessage {
    #[serde(rename = "Command")]
    command: String,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl ProxyMessage {
    fn to_raw(&self) -> RawMessage {
        let (command, name) = match self {
            ProxyMessage::PostNotification { name } => (CMD_POST, Some(name.clone())),
            ProxyMessage::ObserveNotification { name } => (CMD_OBSERVE, Some(name.clone())),
            ProxyMessage::RelayNotification { name } => (CMD_RELAY, Some(name.clone())),
            ProxyMessage::Shutdown => (CMD_SHUTDOWN, None),
            ProxyMessage::ProxyDeath => (CMD_PROXY_DEATH, None),
            ProxyMessage::Unknown { command } => (command.as_str(), None),
        };
        RawMessage {
            command: command.to_string(),
            name,
        }
    }

    fn from_raw(raw: RawMessage) -> Result<Self, ProtocolError> {
        let require_name = |name: Option<String>| {
            name.ok_or_else(|| {
                ProtocolError::Decode(format!("{} message without Name", raw.command))
            })
        };
        let msg = match raw.command.as_str() {
            CMD_POST => ProxyMessage::PostNotification {
                name: require_name(raw.name.clone())?,
            },
            CMD_OBSERVE => ProxyMessage::ObserveNotification {
                name: require_name(raw.name.clone())?,
            },
            CMD_RELAY => ProxyMessage::RelayNotification {
                name: require_name(raw.name.clone())?,
            },
            CMD_SHUTDOWN => ProxyMessage::Shutdown,
            CMD_PROXY_DEATH => ProxyMessage::ProxyDeath,
            _ => ProxyMessage::Unknown {
                command: raw.command.clone(),
            },
        };
        Ok(msg)
    }

    /// 编码消息体（不含长度前缀）
    pub fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, &self.to_raw())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(body)
    }

    /// 解码消息体（不含长度前缀）
    pub fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawMessage = plist::from_bytes(body)?;
        Self::from_raw(raw)
    }

    /// 编码完整帧并追加到 `buf`
    ///
    /// 多条消息可以依次追加到同一个缓冲区，再一次性写出。
    pub fn encode_frame(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = self.encode_body()?;
        let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: body.len(),
            limit: u32::MAX as usize,
        })?;
        buf.reserve(NOTIFICATION_LENGTH_PREFIX + body.len());
        buf.put_u32(len);
        buf.put_slice(&body);
        Ok(())
    }

    /// 解码完整帧
    ///
    /// 声明长度必须与可用字节数完全一致，否则返回 `ProtocolError::Framing`。
    pub fn decode_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < NOTIFICATION_LENGTH_PREFIX {
            return Err(ProtocolError::Framing {
                declared: NOTIFICATION_LENGTH_PREFIX,
                available: frame.len(),
            });
        }
        let declared = body_length(&frame[..NOTIFICATION_LENGTH_PREFIX]);
        let body = &frame[NOTIFICATION_LENGTH_PREFIX..];
        if declared != body.len() {
            return Err(ProtocolError::Framing {
                declared,
                available: body.len(),
            });
        }
        Self::decode_body(body)
    }
}

/// 从 4 字节长度前缀解析消息体长度
pub fn body_length(prefix: &[u8]) -> usize {
    let mut len = [0u8; NOTIFICATION_LENGTH_PREFIX];
    let n = prefix.len().min(NOTIFICATION_LENGTH_PREFIX);
    len[..n].copy_from_slice(&prefix[..n]);
    u32::from_be_bytes(len) as usize
}
