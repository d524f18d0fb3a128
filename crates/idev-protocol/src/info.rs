//! 文件 / 设备元数据
//!
//! 远端以扁平键值列表传输元数据，新版本可能新增字段。
//! 这里保留完整的字符串映射（按键排序），并提供常用字段的类型化访问器；
//! 未知键原样保留，不影响调用方。

use crate::ProtocolError;
use std::collections::BTreeMap;

// 文件元数据键
pub const KEY_SIZE: &str = "st_size";
pub const KEY_BLOCKS: &str = "st_blocks";
pub const KEY_NLINK: &str = "st_nlink";
pub const KEY_IFMT: &str = "st_ifmt";
pub const KEY_MTIME: &str = "st_mtime";
pub const KEY_BIRTHTIME: &str = "st_birthtime";
pub const KEY_LINK_TARGET: &str = "LinkTarget";

// 设备元数据键
pub const KEY_MODEL: &str = "Model";
pub const KEY_TOTAL_BYTES: &str = "FSTotalBytes";
pub const KEY_FREE_BYTES: &str = "FSFreeBytes";
pub const KEY_BLOCK_SIZE: &str = "FSBlockSize";

/// inode 类型分类（`st_ifmt`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Regular,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Other(String),
}

impl FileType {
    pub fn from_ifmt(value: &str) -> Self {
        match value {
            "S_IFDIR" => FileType::Directory,
            "S_IFREG" => FileType::Regular,
            "S_IFLNK" => FileType::Symlink,
            "S_IFCHR" => FileType::CharDevice,
            "S_IFBLK" => FileType::BlockDevice,
            "S_IFIFO" => FileType::Fifo,
            "S_IFSOCK" => FileType::Socket,
            other => FileType::Other(other.to_string()),
        }
    }

    pub fn as_ifmt(&self) -> &str {
        match self {
            FileType::Directory => "S_IFDIR",
            FileType::Regular => "S_IFREG",
            FileType::Symlink => "S_IFLNK",
            FileType::CharDevice => "S_IFCHR",
            FileType::BlockDevice => "S_IFBLK",
            FileType::Fifo => "S_IFIFO",
            FileType::Socket => "S_IFSOCK",
            FileType::Other(s) => s,
        }
    }
}

fn parse_u64(map: &BTreeMap<String, String>, key: &str) -> Option<u64> {
    map.get(key).and_then(|v| v.trim().parse().ok())
}

/// 文件元数据（`GetFileInfo` 结果）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    fields: BTreeMap<String, String>,
}

impl FileInfo {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            fields: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.get(KEY_IFMT).map(FileType::from_ifmt)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }

    pub fn size(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_SIZE)
    }

    pub fn blocks(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_BLOCKS)
    }

    pub fn nlink(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_NLINK)
    }

    /// 修改时间（纳秒，Unix 纪元）
    pub fn mtime_ns(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_MTIME)
    }

    /// 创建时间（纳秒，Unix 纪元）
    pub fn birthtime_ns(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_BIRTHTIME)
    }

    pub fn link_target(&self) -> Option<&str> {
        self.get(KEY_LINK_TARGET)
    }
}

/// 文件系统级元数据（`GetDevInfo` 结果）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    fields: BTreeMap<String, String>,
}

impl DeviceInfo {
    /// 构造并校验 `FSTotalBytes >= FSFreeBytes`
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ProtocolError> {
        let info = Self {
            fields: pairs.into_iter().collect(),
        };
        if let (Some(total), Some(free)) = (info.total_bytes(), info.free_bytes())
            && total < free
        {
            return Err(ProtocolError::Decode(format!(
                "device reports {free} free bytes out of {total}"
            )));
        }
        Ok(info)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }

    pub fn model(&self) -> Option<&str> {
        self.get(KEY_MODEL)
    }

    pub fn total_bytes(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_TOTAL_BYTES)
    }

    pub fn free_bytes(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_FREE_BYTES)
    }

    pub fn block_size(&self) -> Option<u64> {
        parse_u64(&self.fields, KEY_BLOCK_SIZE)
    }
}
