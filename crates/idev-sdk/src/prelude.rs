//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use idev_sdk::prelude::*;
//! ```

// 客户端
pub use crate::client::{
    ChannelCallback, ClientConfig, FileAccessClient, NotificationCallback, NotificationEvent,
    NotificationProxyClient,
};

// 元数据与句柄
pub use crate::protocol::{DeviceInfo, FileHandle, FileInfo, FileType, LockOperation, OpenMode};

// 连接
pub use crate::transport::{ServiceConnection, StreamConnection};

// 错误类型
pub use crate::client::ServiceError;
pub use crate::protocol::{ErrorKind, ProtocolError};
pub use crate::transport::TransportError;
