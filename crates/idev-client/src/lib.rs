//! # idev Client
//!
//! 设备服务客户端层：
//!
//! - [`NotificationProxyClient`]: 通知代理（发送、订阅、监听命名事件）
//! - [`FileAccessClient`]: 文件访问服务（目录、元数据、文件句柄读写）
//!
//! 两个客户端都建立在任意 [`ServiceConnection`] 之上，
//! 连接的建立与认证由调用方负责。
//!
//! ```rust,no_run
//! use idev_client::{FileAccessClient, NotificationProxyClient, ChannelCallback};
//! use idev_transport::StreamConnection;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), idev_client::ServiceError> {
//! let conn = StreamConnection::connect_tcp("127.0.0.1:62078")?;
//! let mut afc = FileAccessClient::new(conn)?;
//! for entry in afc.read_directory("/")? {
//!     println!("{entry}");
//! }
//!
//! let conn = StreamConnection::connect_tcp("127.0.0.1:62079")?;
//! let np = NotificationProxyClient::new(conn)?;
//! np.observe("com.apple.mobile.application_installed")?;
//! let (callback, events) = ChannelCallback::new(64);
//! np.listen(Arc::new(callback))?;
//! let event = events.recv().ok();
//! np.stop_listening()?;
//! # let _ = event;
//! # Ok(())
//! # }
//! ```
//!
//! [`ServiceConnection`]: idev_transport::ServiceConnection

pub mod config;
pub mod error;
pub mod file_access;
pub mod notification;

pub use config::ClientConfig;
pub use error::ServiceError;
pub use file_access::{FileAccessClient, OpenFile, TruncateTarget};
pub use notification::{
    ChannelCallback, NotificationCallback, NotificationEvent, NotificationProxyClient,
};
