// 远程路径值类型

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::escape::escape;

/// 远程路径（以 `/` 分隔的原始字符串，不做规范化）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    pub const SEPARATOR: char = '/';

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// 根目录 `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// 用户主目录简写 `~`
    pub fn home() -> Self {
        Self("~".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 去掉最后一段；没有分隔符或本身是根目录时返回 None
    pub fn parent(&self) -> Option<RemotePath> {
        let index = self.0.rfind(Self::SEPARATOR)?;
        match &self.0[..index] {
            "" if self.0.len() > 1 => Some(Self::root()),
            "" => None,
            parent => Some(Self(parent.to_string())),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(Self::SEPARATOR)
    }

    /// 最后一段（没有分隔符时返回整个路径）
    pub fn last_segment(&self) -> &str {
        match self.0.rfind(Self::SEPARATOR) {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }

    /// 拼接子路径；子路径为绝对路径时直接替换
    pub fn resolve(&self, child: &str) -> RemotePath {
        if child.starts_with(Self::SEPARATOR) {
            return Self(child.to_string());
        }
        let child = child.strip_suffix(Self::SEPARATOR).unwrap_or(child);
        let mut path = String::with_capacity(self.0.len() + child.len() + 1);
        path.push_str(self.0.trim_end_matches(Self::SEPARATOR));
        path.push(Self::SEPARATOR);
        path.push_str(child);
        Self(path)
    }

    /// 转义为 shell 参数；前导 `~` 保持不加引号以便 shell 展开
    pub fn to_shell_arg(&self) -> String {
        match self.0.strip_prefix('~') {
            Some("") => "~".to_string(),
            Some(rest) if rest.starts_with(Self::SEPARATOR) => {
                let rest = &rest[1..];
                if rest.is_empty() {
                    "~/".to_string()
                } else {
                    format!("~/{}", escape(rest))
                }
            }
            _ => escape(&self.0),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RemotePath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
