// SSH 连接（Connection）
//
// 一个 Connection 绑定一个 RemoteHost 与一条已认证的传输：
// - 每次调用打开独立的通道，同一连接上的调用可并发
// - 传输断开后保持为活动连接，下一次调用前串行地重新认证

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{ready, Context, Poll};

use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, info, warn};

use super::channel::RemoteChannel;
use super::client::{Connector, LinkState, Transport};
use super::error::SshError;
use crate::fs::RemoteFileSystem;
use crate::models::{ConnectionSettings, RemoteHost};

/// execute_continuously 单行的最大字节数
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// 到单个主机的 SSH 连接
pub struct Connection {
    /// 连接 ID
    id: String,
    host: RemoteHost,
    connector: Arc<dyn Connector>,
    transport: RwLock<Arc<dyn Transport>>,
    link: Arc<LinkState>,
    /// 重新认证锁（同一时间只允许一个调用方重连）
    resurrect_lock: Mutex<()>,
    closed: AtomicBool,
    reconnects: AtomicU32,
    settings: ConnectionSettings,
}

impl Connection {
    /// 建立并认证传输
    pub async fn open(
        host: RemoteHost,
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
    ) -> Result<Arc<Self>, SshError> {
        let link = LinkState::new(false);
        let monitor = link.next_monitor();
        let generation = monitor.generation();

        let transport = connector.connect(&host, monitor).await?;
        link.mark_connected(generation);

        let connection = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            host,
            connector,
            transport: RwLock::new(transport),
            link,
            resurrect_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            settings,
        });
        info!(
            "[SSH] [{}] Connection {} established",
            connection.host.display_name(),
            connection.id
        );
        Ok(connection)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    /// 传输当前是否可用
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.link.is_connected()
    }

    /// 订阅传输状态变化
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 已完成的重新认证次数
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// 绑定到本连接的远程文件系统
    pub fn filesystem(self: &Arc<Self>) -> RemoteFileSystem {
        RemoteFileSystem::new(self.clone())
    }

    /// 关闭连接（幂等，不等待传输关闭完成）
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "[SSH] [{}] Closing connection {}",
            self.host.display_name(),
            self.id
        );
        let transport = self.current_transport();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { transport.disconnect().await });
            }
            Err(_) => warn!("[SSH] No runtime available, dropping transport without disconnect"),
        }
    }

    fn current_transport(&self) -> Arc<dyn Transport> {
        self.transport
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.is_closed() {
            Err(SshError::Closed)
        } else {
            Ok(())
        }
    }

    /// 返回可用的传输，必要时重新认证
    async fn resurrect(&self) -> Result<Arc<dyn Transport>, SshError> {
        self.ensure_open()?;
        if self.link.is_connected() {
            return Ok(self.current_transport());
        }

        let _guard = self.resurrect_lock.lock().await;
        self.ensure_open()?;
        if self.link.is_connected() {
            return Ok(self.current_transport());
        }

        info!(
            "[SSH] [{}] Transport lost, re-authenticating...",
            self.host.display_name()
        );
        let monitor = self.link.next_monitor();
        let generation = monitor.generation();
        let transport = self.connector.connect(&self.host, monitor).await?;

        let previous = {
            let mut slot = self
                .transport
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *slot, transport.clone())
        };
        tokio::spawn(async move { previous.disconnect().await });

        if self.is_closed() {
            let orphan = transport.clone();
            tokio::spawn(async move { orphan.disconnect().await });
            return Err(SshError::Closed);
        }

        let attempt = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        self.link.mark_connected(generation);
        info!(
            "[SSH] [{}] Re-authenticated (reconnect #{})",
            self.host.display_name(),
            attempt
        );
        Ok(transport)
    }

    /// 打开执行 command 的新通道
    pub async fn open_channel(&self, command: &str) -> Result<RemoteChannel, SshError> {
        let transport = self.resurrect().await?;
        debug!("[SSH] [{}] exec: {}", self.host.display_name(), command);
        transport.open_exec(command).await
    }

    /// 执行命令并返回去掉首尾空白的 stdout
    pub async fn execute(&self, command: &str) -> Result<String, SshError> {
        let mut channel = self.open_channel(command).await?;
        let exec_timeout = self.settings.exec_timeout();

        let mut stdout = Vec::new();
        timeout(exec_timeout, channel.read_to_end(&mut stdout))
            .await
            .map_err(|_| SshError::Timeout(exec_timeout.as_secs()))??;
        channel.process_result()?;

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// 执行命令，以字节流返回 stdout
    pub async fn execute_as_source(&self, command: &str) -> Result<CommandSource, SshError> {
        let channel = self.open_channel(command).await?;
        Ok(CommandSource { channel })
    }

    /// 执行命令，逐行返回 stdout
    ///
    /// 按 `\n` 分行，非 UTF-8 字节替换为 U+FFFD。
    /// 命令以非零状态退出时，最后一项为错误。丢弃流即关闭通道。
    pub async fn execute_continuously(
        &self,
        command: &str,
    ) -> Result<BoxStream<'static, Result<String, SshError>>, SshError> {
        let channel = self.open_channel(command).await?;
        let line_timeout = self.settings.stream_timeout();
        let codec =
            AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
        let lines = FramedRead::new(channel, codec);

        let stream = futures::stream::unfold(Some(lines), move |state| async move {
            let mut lines = state?;
            let next = match line_timeout {
                Some(limit) => match timeout(limit, lines.next()).await {
                    Ok(next) => next,
                    Err(_) => return Some((Err(SshError::Timeout(limit.as_secs())), None)),
                },
                None => lines.next().await,
            };
            match next {
                Some(Ok(line)) => {
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    Some((Ok(line), Some(lines)))
                }
                Some(Err(e)) => Some((Err(line_error(e)), None)),
                None => match lines.get_ref().process_result() {
                    Ok(()) => None,
                    Err(e) => Some((Err(SshError::RemoteProcess(e)), None)),
                },
            }
        });
        Ok(stream.boxed())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("[SSH] Connection {} dropped without close", self.id);
        }
    }
}

fn line_error(error: AnyDelimiterCodecError) -> SshError {
    match error {
        AnyDelimiterCodecError::Io(e) => SshError::from_io(e),
        AnyDelimiterCodecError::MaxChunkLengthExceeded => SshError::Protocol(format!(
            "line longer than {} bytes",
            MAX_LINE_LENGTH
        )),
    }
}

/// 命令的 stdout 字节流
///
/// 读到末尾时若命令以非零状态退出，返回包装了 RemoteProcessError 的 io::Error
/// （可用 SshError::from_io 还原）。
pub struct CommandSource {
    channel: RemoteChannel,
}

impl CommandSource {
    /// 命令的 stderr（读完后完整）
    pub fn stderr(&self) -> &[u8] {
        self.channel.stderr()
    }
}

impl AsyncRead for CommandSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.channel).poll_read(cx, buf))?;
        if buf.filled().len() == before {
            this.channel.process_result().map_err(io::Error::other)?;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for CommandSource {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        let drained = ready!(Pin::new(&mut this.channel).poll_fill_buf(cx))?.is_empty();
        if drained {
            this.channel.process_result().map_err(io::Error::other)?;
        }
        Poll::Ready(Ok(this.channel.buffered()))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().channel).consume(amt)
    }
}
