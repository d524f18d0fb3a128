//! idev SDK - 设备服务客户端
//!
//! 在已建立的设备服务连接上使用通知代理与文件访问服务。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 帧编解码、状态码表、错误分类
//! - **传输层** (`transport`): 连接抽象、帧边界保护
//! - **客户端层** (`client`): `NotificationProxyClient` / `FileAccessClient`
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use idev_sdk::prelude::*;
//!
//! # fn main() -> Result<(), ServiceError> {
//! idev_sdk::init_logging();
//! let conn = StreamConnection::connect_tcp("127.0.0.1:62078")?;
//! let mut afc = FileAccessClient::new(conn)?;
//! let info = afc.device_info()?;
//! println!("{:?} free {:?}", info.model(), info.free_bytes());
//! # Ok(())
//! # }
//! ```

pub use idev_client as client;
pub use idev_protocol as protocol;
pub use idev_transport as transport;

mod logging;
pub mod prelude;

pub use logging::init_logging;

// --- 用户以此为界 ---

// 客户端层（推荐入口）
pub use client::{
    ChannelCallback, ClientConfig, FileAccessClient, NotificationCallback, NotificationEvent,
    NotificationProxyClient, OpenFile, ServiceError, TruncateTarget,
};

// 协议层常用类型
pub use protocol::{
    DeviceInfo, ErrorKind, FileHandle, FileInfo, FileType, LockOperation, OpenMode,
    ProtocolError, names,
};

// 传输层
pub use transport::{ServiceConnection, StreamConnection, TransportError};
