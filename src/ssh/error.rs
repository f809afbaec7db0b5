// SSH 错误类型定义

use std::fmt;

use thiserror::Error;

use crate::scp::ScpError;

/// 远程命令以非零状态退出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProcessError {
    /// 退出码（远端未报告退出码时为 -1）
    pub exit_code: i32,
    /// 去掉首尾空白后的 stderr，为空时为 None
    pub message: Option<String>,
}

impl RemoteProcessError {
    /// shell 约定的 "command not found" 退出码
    pub const EXIT_CODE_NOT_FOUND: i32 = 127;

    pub fn new(exit_code: i32, stderr: &[u8]) -> Self {
        let message = String::from_utf8_lossy(stderr).trim().to_string();
        Self {
            exit_code,
            message: if message.is_empty() {
                None
            } else {
                Some(message)
            },
        }
    }

    /// 命令不存在（可用于能力探测）
    pub fn is_command_not_found(&self) -> bool {
        self.exit_code == Self::EXIT_CODE_NOT_FOUND
    }
}

impl fmt::Display for RemoteProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "remote process exited with {}: {}", self.exit_code, message),
            None => write!(f, "remote process exited with {}", self.exit_code),
        }
    }
}

impl std::error::Error for RemoteProcessError {}

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 超时
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 传输层已断开
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// 连接已被关闭（显式断开或被替换）
    #[error("Connection closed")]
    Closed,

    /// 连接已取消
    #[error("Connection cancelled")]
    Cancelled,

    /// 远程命令失败
    #[error(transparent)]
    RemoteProcess(#[from] RemoteProcessError),

    /// SCP 协议错误
    #[error(transparent)]
    Scp(#[from] ScpError),
}

impl SshError {
    /// 是否为取消（调用方不应把它当作普通失败处理）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SshError::Cancelled)
    }

    /// 若为远程命令失败，返回其详情
    pub fn as_remote_process(&self) -> Option<&RemoteProcessError> {
        match self {
            SshError::RemoteProcess(e) => Some(e),
            _ => None,
        }
    }

    /// 从字节流适配器返回的 io::Error 中还原 SshError
    pub fn from_io(error: std::io::Error) -> Self {
        let typed = error.get_ref().map_or(false, |inner| {
            inner.is::<RemoteProcessError>() || inner.is::<ScpError>()
        });
        if !typed {
            return SshError::Io(error);
        }
        let kind = error.kind();
        match error.into_inner() {
            Some(inner) => match inner.downcast::<RemoteProcessError>() {
                Ok(e) => SshError::RemoteProcess(*e),
                Err(inner) => match inner.downcast::<ScpError>() {
                    Ok(e) => SshError::Scp(*e),
                    Err(inner) => SshError::Io(std::io::Error::new(kind, inner)),
                },
            },
            None => SshError::Io(std::io::Error::from(kind)),
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}
