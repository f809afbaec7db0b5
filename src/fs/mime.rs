// MIME 类型

use std::fmt;

/// `type/subtype` 形式的 MIME 类型（统一小写）
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MimeType(String);

impl MimeType {
    pub const DIRECTORY_STR: &'static str = "inode/directory";
    pub const UNKNOWN_STR: &'static str = "application/octet-stream";

    pub fn directory() -> Self {
        Self(Self::DIRECTORY_STR.to_string())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN_STR.to_string())
    }

    /// 解析 MIME 字符串，格式不合法时返回 None
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (kind, subtype) = value.split_once('/')?;
        let kind_ok = !kind.is_empty()
            && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let subtype_ok = subtype == "*"
            || (!subtype.is_empty()
                && subtype
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_')));
        if kind_ok && subtype_ok {
            Some(Self(value.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// 主类型，`*` 视为未指定
    pub fn kind(&self) -> Option<&str> {
        self.0.split_once('/').map(|(k, _)| k).filter(|k| *k != "*")
    }

    /// 子类型，`*` 视为未指定
    pub fn subtype(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, s)| s).filter(|s| *s != "*")
    }

    /// 通配匹配：pattern 中未指定的部分匹配任意值
    pub fn matches(&self, pattern: &MimeType) -> bool {
        let kind_ok = pattern.kind().map_or(true, |k| self.kind() == Some(k));
        let subtype_ok = pattern.subtype().map_or(true, |s| self.subtype() == Some(s));
        kind_ok && subtype_ok
    }

    pub fn is_directory(&self) -> bool {
        self.0 == Self::DIRECTORY_STR
    }

    pub fn is_image(&self) -> bool {
        self.kind() == Some("image")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 按文件名扩展名推断 MIME 类型
    ///
    /// 先去掉 `~` 与 `.tmp` 后缀，扩展名需为 1-5 个字符
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = normalized_extension(name)?;
        mime_guess::from_ext(&extension)
            .first()
            .and_then(|m| Self::parse(m.essence_str()))
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalized_extension(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    let trimmed = lower.strip_suffix('~').unwrap_or(&lower);
    let trimmed = trimmed.strip_suffix(".tmp").unwrap_or(trimmed);
    let (_, extension) = trimmed.rsplit_once('.')?;
    let len = extension.chars().count();
    if (1..=5).contains(&len) {
        Some(extension.to_string())
    } else {
        None
    }
}
