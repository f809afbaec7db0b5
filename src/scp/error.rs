// SCP 错误类型定义

use std::io;

use thiserror::Error;

/// SCP 协议错误
#[derive(Debug, Error)]
pub enum ScpError {
    /// 远端 scp 在协议完成前退出
    #[error("Remote scp terminated unexpectedly")]
    RemoteTerminated,

    /// 远端报告的错误（0x01 / 0x02）
    #[error("Remote SCP error: {0}")]
    Remote(String),

    /// 格式错误的控制行
    #[error("Malformed C line sent by remote SCP binary: {0}")]
    MalformedControlLine(String),

    /// 意外的响应字节
    #[error("Unexpected response from remote SCP: {0:?}")]
    UnexpectedResponse(String),

    /// 无法写入 'C' 控制行的文件名
    #[error("File name cannot be sent over SCP: {0:?}")]
    InvalidFileName(String),

    #[error("SCP I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ScpError> for io::Error {
    fn from(error: ScpError) -> Self {
        match error {
            ScpError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}
