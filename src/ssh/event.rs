// SSH 连接事件定义

use chrono::{DateTime, Local};

/// 连接事件（由 ConnectionManager 广播）
#[derive(Clone, Debug)]
pub struct ConnectionEvent {
    /// 时间戳
    pub timestamp: DateTime<Local>,
    /// 连接 ID
    pub connection_id: String,
    pub kind: ConnectionEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// 连接建立并成为活动连接
    Connected { host: String },
    /// 连接尝试失败
    Failed { error: String },
    /// 活动连接被关闭（显式断开或被替换）
    Disconnected { reason: String },
    /// 传输断开，连接仍为活动连接
    LinkLost,
    /// 传输已重建
    Resurrected { attempt: u32 },
}

impl ConnectionEvent {
    pub fn new(connection_id: impl Into<String>, kind: ConnectionEventKind) -> Self {
        Self {
            timestamp: Local::now(),
            connection_id: connection_id.into(),
            kind,
        }
    }

    /// 单行描述（用于日志与 CLI 输出）
    pub fn describe(&self) -> String {
        let detail = match &self.kind {
            ConnectionEventKind::Connected { host } => format!("connected to {}", host),
            ConnectionEventKind::Failed { error } => format!("failed: {}", error),
            ConnectionEventKind::Disconnected { reason } => format!("disconnected ({})", reason),
            ConnectionEventKind::LinkLost => "link lost".to_string(),
            ConnectionEventKind::Resurrected { attempt } => {
                format!("link restored (reconnect #{})", attempt)
            }
        };
        format!(
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.connection_id,
            detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let event = ConnectionEvent::new("abc", ConnectionEventKind::Resurrected { attempt: 2 });
        assert!(event.describe().ends_with("[abc] link restored (reconnect #2)"));
    }
}
