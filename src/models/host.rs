// 远程主机描述

use std::fmt;

use serde::{Deserialize, Serialize};

/// 远程主机（不可变值，按结构相等判断 "是否已连接到该主机"）
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHost {
    /// 本地 ID，0 表示尚未保存
    pub local_id: i64,
    pub hostname: String,
    pub port: u16,
    pub alias: Option<String>,
    pub username: String,
    /// 密码
    pub secret: String,
}

impl RemoteHost {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            local_id: 0,
            hostname: hostname.into(),
            port,
            alias: None,
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// 显示名称：优先使用别名
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.hostname)
    }

    /// `hostname:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// 是否尚未保存到本地存储
    pub fn is_unsaved(&self) -> bool {
        self.local_id == 0
    }

    /// 检查字段合法性
    pub fn validate(&self) -> Result<(), String> {
        if self.hostname.trim().is_empty() {
            return Err("hostname is empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be in 1..=65535".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("username is empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("local_id", &self.local_id)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("alias", &self.alias)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let host = RemoteHost::new("10.0.0.2", 22, "pi", "raspberry");
        assert_eq!(host.display_name(), "10.0.0.2");
        assert_eq!(host.with_alias("kitchen").display_name(), "kitchen");
    }

    #[test]
    fn test_debug_hides_secret() {
        let host = RemoteHost::new("h", 22, "u", "hunter2");
        assert!(!format!("{:?}", host).contains("hunter2"));
    }

    #[test]
    fn test_validate() {
        assert!(RemoteHost::new("h", 22, "u", "").validate().is_ok());
        assert!(RemoteHost::new("h", 0, "u", "").validate().is_err());
        assert!(RemoteHost::new(" ", 22, "u", "").validate().is_err());
    }

    #[test]
    fn test_structural_equality() {
        let a = RemoteHost::new("h", 22, "u", "p");
        let mut b = a.clone();
        assert_eq!(a, b);
        b.port = 2222;
        assert_ne!(a, b);
    }
}
