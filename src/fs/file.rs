// 远程文件条目

use super::mime::MimeType;
use super::path::RemotePath;

/// XDG 用户目录类型（`xdg-user-dir` 的参数）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XdgUserDir {
    Desktop,
    Download,
    Templates,
    PublicShare,
    Documents,
    Music,
    Pictures,
    Videos,
}

impl XdgUserDir {
    pub const ALL: [XdgUserDir; 8] = [
        Self::Desktop,
        Self::Download,
        Self::Templates,
        Self::PublicShare,
        Self::Documents,
        Self::Music,
        Self::Pictures,
        Self::Videos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "DESKTOP",
            Self::Download => "DOWNLOAD",
            Self::Templates => "TEMPLATES",
            Self::PublicShare => "PUBLICSHARE",
            Self::Documents => "DOCUMENTS",
            Self::Music => "MUSIC",
            Self::Pictures => "PICTURES",
            Self::Videos => "VIDEOS",
        }
    }
}

/// 由一行 `ls -l` 输出解析出的文件条目
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: RemotePath,
    pub size: i64,
    /// 修改时间（Unix 毫秒）
    pub last_modified: i64,
    pub owner: String,
    pub symlink_target: Option<String>,
    pub mime_type: MimeType,
    /// 该路径对应的 XDG 用户目录（如果有）
    pub xdg_user_dir: Option<XdgUserDir>,
}

impl RemoteFile {
    pub fn name(&self) -> &str {
        self.path.last_segment()
    }

    pub fn parent_path(&self) -> Option<RemotePath> {
        self.path.parent()
    }

    pub fn is_directory(&self) -> bool {
        self.mime_type.is_directory()
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }

    /// 是否是隐藏文件（以 . 开头）
    pub fn is_hidden(&self) -> bool {
        self.name().starts_with('.')
    }
}
