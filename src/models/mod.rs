// 数据模型模块

pub mod host;
pub mod settings;

pub use host::RemoteHost;
pub use settings::{AppSettings, ConnectionSettings, FileSettings, LoggingSettings};
