// SSH 客户端核心实现
//
// - Transport: 一条已认证的传输，可并发打开任意多个 exec 通道
// - Connector: 建立并认证 Transport
// - LinkMonitor: 传输断开时由 Handler 回调，翻转连接状态
// - RusshConnector / RusshTransport: 基于 russh 的实现

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::channel::{ChannelControl, ChannelEndpoint, ChannelEvent, RemoteChannel};
use super::config::SshConfig;
use super::error::SshError;
use super::handler::{HostKeyInfo, SshClientHandler};
use crate::models::{ConnectionSettings, RemoteHost};

/// 关闭传输时等待服务器响应的上限
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 一条已认证的传输
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 打开新通道并执行命令
    async fn open_exec(&self, command: &str) -> Result<RemoteChannel, SshError>;

    /// 断开传输（尽力而为）
    async fn disconnect(&self);
}

/// 建立并认证传输
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// 连接并认证；传输断开时必须调用 monitor.connection_lost()
    async fn connect(
        &self,
        host: &RemoteHost,
        monitor: LinkMonitor,
    ) -> Result<Arc<dyn Transport>, SshError>;
}

/// 连接状态（可观察）
///
/// 每次建立传输都会领取新的代数，旧传输迟到的断线回调不会影响新传输。
pub struct LinkState {
    connected: watch::Sender<bool>,
    generation: AtomicU64,
    /// 最近一次报告断开的代数
    lost: AtomicU64,
}

impl LinkState {
    pub fn new(connected: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(connected);
        Arc::new(Self {
            connected: tx,
            generation: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// 为即将建立的传输领取监视器
    pub fn next_monitor(self: &Arc<Self>) -> LinkMonitor {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LinkMonitor {
            state: Some(self.clone()),
            generation,
        }
    }

    /// 传输建立完成；若该代传输在此之前已报告断开则保持断开
    pub fn mark_connected(&self, generation: u64) -> bool {
        if self.lost.load(Ordering::SeqCst) == generation {
            return false;
        }
        self.connected.send_replace(true);
        true
    }
}

/// 断线监视器
#[derive(Clone)]
pub struct LinkMonitor {
    state: Option<Arc<LinkState>>,
    generation: u64,
}

impl LinkMonitor {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 不绑定任何连接的监视器（用于一次性连接）
    pub fn detached() -> Self {
        Self {
            state: None,
            generation: 0,
        }
    }

    /// 传输已断开
    pub fn connection_lost(&self) {
        let Some(state) = &self.state else {
            return;
        };
        if state.generation.load(Ordering::SeqCst) != self.generation {
            debug!("[SSH] Ignoring loss report from a replaced transport");
            return;
        }
        state.lost.store(self.generation, Ordering::SeqCst);
        if state.connected.send_replace(false) {
            info!("[SSH] Transport lost, next operation will reconnect");
        }
    }
}

/// 基于 russh 的 Connector
#[derive(Clone, Debug, Default)]
pub struct RusshConnector {
    settings: ConnectionSettings,
}

impl RusshConnector {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    /// TCP 连接 + SSH 握手
    async fn open_handle(
        &self,
        config: &SshConfig,
        handler: SshClientHandler,
    ) -> Result<Handle<SshClientHandler>, SshError> {
        let addr = format!("{}:{}", config.host, config.port);
        let connect_timeout = config.connect_timeout();

        debug!("[SSH] Connecting to {}...", addr);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| SshError::Timeout(config.connect_timeout))?
            .map_err(SshError::Io)?;
        let _ = tcp_stream.set_nodelay(true);
        debug!("[SSH] TCP connection established");

        let russh_config = Arc::new(config.to_russh_config());
        let handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(config.connect_timeout))?
        .map_err(SshError::from)?;

        debug!("[SSH] SSH handshake completed");
        Ok(handle)
    }

    /// 密码认证
    async fn authenticate(
        handle: &mut Handle<SshClientHandler>,
        config: &SshConfig,
    ) -> Result<(), SshError> {
        use russh::client::AuthResult;

        debug!("[SSH] Authenticating as '{}'...", config.username);
        let auth_result = handle
            .authenticate_password(&config.username, &config.password)
            .await
            .map_err(SshError::from)?;

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(SshError::Auth(format!(
                    "Password authentication failed. Server suggests: {:?}",
                    remaining_methods
                )))
            }
        }
    }

    /// 获取服务器主机密钥（不认证）
    pub async fn fetch_host_key(&self, hostname: &str, port: u16) -> Result<HostKeyInfo, SshError> {
        let host = RemoteHost::new(hostname, port, "", "");
        let config = SshConfig::from_host(&host, &self.settings);
        let (key_tx, key_rx) = oneshot::channel();
        let handler = SshClientHandler::new(config.host.clone(), LinkMonitor::detached())
            .with_host_key_capture(key_tx);

        let handle = self.open_handle(&config, handler).await?;
        let _ = timeout(
            DISCONNECT_TIMEOUT,
            handle.disconnect(russh::Disconnect::ByApplication, "", "en"),
        )
        .await;

        key_rx
            .await
            .map_err(|_| SshError::Protocol("Server did not present a host key".to_string()))
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        host: &RemoteHost,
        monitor: LinkMonitor,
    ) -> Result<Arc<dyn Transport>, SshError> {
        host.validate().map_err(SshError::Config)?;
        let config = SshConfig::from_host(host, &self.settings);
        let handler = SshClientHandler::new(config.host.clone(), monitor);

        let mut handle = self.open_handle(&config, handler).await?;
        Self::authenticate(&mut handle, &config).await?;
        info!(
            "[SSH] Authenticated to {}@{}:{}",
            config.username, config.host, config.port
        );

        Ok(Arc::new(RusshTransport {
            handle,
            host: config.host,
            channel_buffer: self.settings.channel_buffer,
        }))
    }
}

/// 基于 russh Handle 的传输
pub struct RusshTransport {
    handle: Handle<SshClientHandler>,
    host: String,
    channel_buffer: usize,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_exec(&self, command: &str) -> Result<RemoteChannel, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(format!("Failed to execute command: {}", e)))?;

        let (local, endpoint) = RemoteChannel::pair(self.channel_buffer);
        tokio::spawn(pump_channel(channel, endpoint));
        Ok(local)
    }

    async fn disconnect(&self) {
        match timeout(
            DISCONNECT_TIMEOUT,
            self.handle
                .disconnect(russh::Disconnect::ByApplication, "", "en"),
        )
        .await
        {
            Ok(Ok(())) => debug!("[SSH] [{}] Disconnected", self.host),
            Ok(Err(e)) => debug!("[SSH] [{}] Disconnect failed: {}", self.host, e),
            Err(_) => warn!("[SSH] [{}] Timeout closing SSH connection, forcing drop", self.host),
        }
    }
}

/// 在 russh 通道与 RemoteChannel 之间转发消息
///
/// 本地端丢弃后关闭远端通道；事件缓冲满时暂停读取，
/// 由 SSH 窗口对远端形成背压。
async fn pump_channel(mut channel: russh::Channel<Msg>, mut endpoint: ChannelEndpoint) {
    loop {
        tokio::select! {
            msg = channel.wait() => {
                let event = match msg {
                    Some(ChannelMsg::Data { data }) => ChannelEvent::Stdout(Bytes::copy_from_slice(&data)),
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext != 1 {
                            continue;
                        }
                        ChannelEvent::Stderr(Bytes::copy_from_slice(&data))
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => ChannelEvent::ExitStatus(exit_status),
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        ChannelEvent::ExitSignal(format!("{:?}", signal_name))
                    }
                    Some(ChannelMsg::Eof) => ChannelEvent::Eof,
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => continue,
                };
                if !endpoint.send(event).await {
                    break;
                }
            }
            control = endpoint.recv() => match control {
                Some(ChannelControl::Data(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        warn!("[SSH] Failed to write to channel: {}", e);
                        break;
                    }
                }
                Some(ChannelControl::Eof) => {
                    let _ = channel.eof().await;
                }
                None => break,
            }
        }
    }
    let _ = channel.close().await;
}
