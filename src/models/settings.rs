// Settings 配置数据结构

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    pub files: FileSettings,
    pub logging: LoggingSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_secs: u32,
    /// 心跳间隔，0 表示关闭
    pub keepalive_interval_secs: u32,
    pub keepalive_max: u32,
    /// 单次命令等待退出状态的上限
    pub exec_timeout_secs: u32,
    /// 持续输出命令每行的等待上限，0 表示不限
    pub stream_timeout_secs: u32,
    /// 每个通道每个方向缓冲的消息数
    pub channel_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            keepalive_interval_secs: 60,
            keepalive_max: 3,
            exec_timeout_secs: 5,
            stream_timeout_secs: 0,
            channel_buffer: 32,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs as u64)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs as u64)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        if self.stream_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stream_timeout_secs as u64))
        }
    }
}

// ======================== 文件管理设置 ========================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub show_hidden: bool,
}

// ======================== 日志设置 ========================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 输出 DEBUG 级别日志
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"connection":{"exec_timeout_secs":9}}"#).unwrap();
        assert_eq!(settings.connection.exec_timeout_secs, 9);
        assert_eq!(settings.connection.connect_timeout_secs, 30);
        assert!(!settings.files.show_hidden);
        assert_eq!(settings.connection.stream_timeout(), None);
    }
}
