// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, KeepaliveConfig)
// - error: 错误类型 (SshError, RemoteProcessError)
// - event: 连接事件 (ConnectionEvent)
// - handler: russh Handler 实现
// - channel: 单次命令的双向字节通道 (RemoteChannel)
// - client: 传输抽象与 russh 实现 (Transport, Connector, RusshConnector)
// - session: 连接 (Connection)
// - manager: 活动连接管理 (ConnectionManager)

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// 公开导出
pub use channel::{ChannelControl, ChannelEndpoint, ChannelEvent, RemoteChannel};
pub use client::{Connector, LinkMonitor, LinkState, RusshConnector, RusshTransport, Transport};
pub use config::{KeepaliveConfig, SshConfig};
pub use error::{RemoteProcessError, SshError};
pub use event::{ConnectionEvent, ConnectionEventKind};
pub use handler::{HostKeyInfo, SshClientHandler};
pub use manager::ConnectionManager;
pub use session::{CommandSource, Connection};
