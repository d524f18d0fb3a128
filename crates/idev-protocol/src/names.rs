//! 已知服务名与通知名
//!
//! 通知名是开放的字符串空间，这里只列出常见的取值；
//! 设备可能发送此处未列出的名字。

/// 通知代理服务名
pub const NOTIFICATION_PROXY_SERVICE: &str = "com.apple.mobile.notification_proxy";

/// 文件访问服务名
pub const FILE_ACCESS_SERVICE: &str = "com.apple.afc";

/// 可从设备接收的通知
pub mod recv {
    pub const SYNC_CANCEL_REQUEST: &str = "com.apple.itunes-client.syncCancelRequest";
    pub const SYNC_SUSPEND_REQUEST: &str = "com.apple.itunes-client.syncSuspendRequest";
    pub const SYNC_RESUME_REQUEST: &str = "com.apple.itunes-client.syncResumeRequest";
    pub const PHONE_NUMBER_CHANGED: &str = "com.apple.mobile.lockdown.phone_number_changed";
    pub const DEVICE_NAME_CHANGED: &str = "com.apple.mobile.lockdown.device_name_changed";
    pub const TIMEZONE_CHANGED: &str = "com.apple.mobile.lockdown.timezone_changed";
    pub const TRUSTED_HOST_ATTACHED: &str = "com.apple.mobile.lockdown.trusted_host_attached";
    pub const HOST_DETACHED: &str = "com.apple.mobile.lockdown.host_detached";
    pub const HOST_ATTACHED: &str = "com.apple.mobile.lockdown.host_attached";
    pub const REGISTRATION_FAILED: &str = "com.apple.mobile.lockdown.registration_failed";
    pub const ACTIVATION_STATE: &str = "com.apple.mobile.lockdown.activation_state";
    pub const BRICK_STATE: &str = "com.apple.mobile.lockdown.brick_state";
    /// iOS 4.0+
    pub const DISK_USAGE_CHANGED: &str = "com.apple.mobile.lockdown.disk_usage_changed";
    pub const DS_DOMAIN_CHANGED: &str = "com.apple.mobile.data_sync.domain_changed";
    pub const BACKUP_DOMAIN_CHANGED: &str = "com.apple.mobile.backup.domain_changed";
    pub const APP_INSTALLED: &str = "com.apple.mobile.application_installed";
    pub const APP_UNINSTALLED: &str = "com.apple.mobile.application_uninstalled";
    pub const DEV_IMAGE_MOUNTED: &str = "com.apple.mobile.developer_image_mounted";
    pub const ATTEMPT_ACTIVATION: &str = "com.apple.springboard.attemptactivation";
    pub const ITDBPREP_DID_END: &str = "com.apple.itdbprep.notification.didEnd";
    pub const LANGUAGE_CHANGED: &str = "com.apple.language.changed";
    pub const ADDRESS_BOOK_PREF_CHANGED: &str = "com.apple.AddressBook.PreferenceChanged";
}

/// 可发送给设备的通知
pub mod send {
    pub const SYNC_WILL_START: &str = "com.apple.itunes-mobdev.syncWillStart";
    pub const SYNC_DID_START: &str = "com.apple.itunes-mobdev.syncDidStart";
    pub const SYNC_DID_FINISH: &str = "com.apple.itunes-mobdev.syncDidFinish";
    pub const SYNC_LOCK_REQUEST: &str = "com.apple.itunes-mobdev.syncLockRequest";
}
