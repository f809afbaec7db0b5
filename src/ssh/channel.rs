// 远程命令通道
//
// 每次 exec 打开一个独立的 RemoteChannel，通道之间互不共享。
// 读写两端通过有界 mpsc 与底层传输解耦：
// - 读：ChannelEvent（stdout / stderr / 退出状态），实现 AsyncRead + AsyncBufRead
// - 写：ChannelControl（stdin 数据 / EOF），实现 AsyncWrite
// 丢弃 RemoteChannel 即关闭控制端，传输层据此关闭远端通道。

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use super::error::RemoteProcessError;

/// 远端 → 本地 的通道事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 标准输出数据
    Stdout(Bytes),
    /// 标准错误数据
    Stderr(Bytes),
    /// 退出状态
    ExitStatus(u32),
    /// 因信号退出
    ExitSignal(String),
    /// 远端不再发送数据
    Eof,
}

/// 本地 → 远端 的控制消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelControl {
    /// 写入标准输入
    Data(Bytes),
    /// 关闭标准输入
    Eof,
}

/// 远程命令通道（本地端）
pub struct RemoteChannel {
    events: mpsc::Receiver<ChannelEvent>,
    control: PollSender<ChannelControl>,
    /// 尚未被消费的 stdout 数据
    pending: Bytes,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    closed: bool,
    eof_sent: bool,
}

/// 远程命令通道（传输端）
///
/// 由传输实现持有：把远端消息转为 ChannelEvent，
/// 并把 ChannelControl 转发给远端。
pub struct ChannelEndpoint {
    events: mpsc::Sender<ChannelEvent>,
    control: mpsc::Receiver<ChannelControl>,
}

impl RemoteChannel {
    /// 创建一对通道端点，capacity 为每个方向的缓冲消息数
    pub fn pair(capacity: usize) -> (RemoteChannel, ChannelEndpoint) {
        let capacity = capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::channel(capacity);
        let channel = RemoteChannel {
            events: event_rx,
            control: PollSender::new(control_tx),
            pending: Bytes::new(),
            stderr: Vec::new(),
            exit_status: None,
            exit_signal: None,
            closed: false,
            eof_sent: false,
        };
        let endpoint = ChannelEndpoint {
            events: event_tx,
            control: control_rx,
        };
        (channel, endpoint)
    }

    /// 远端报告的退出状态（通道关闭前可能为 None）
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn exit_signal(&self) -> Option<&str> {
        self.exit_signal.as_deref()
    }

    /// 目前收到的 stderr
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// 已收到但尚未消费的 stdout
    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    /// 远端通道是否已关闭（所有事件都已消费）
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 根据退出状态生成结果；未报告退出码时视为失败（-1）
    pub fn process_result(&self) -> Result<(), RemoteProcessError> {
        match self.exit_status {
            Some(0) => Ok(()),
            Some(code) => Err(RemoteProcessError::new(code as i32, &self.stderr)),
            None => {
                let mut error = RemoteProcessError::new(-1, &self.stderr);
                if error.message.is_none() {
                    error.message = self
                        .exit_signal
                        .as_ref()
                        .map(|signal| format!("terminated by signal {}", signal));
                }
                Err(error)
            }
        }
    }

    /// 读取剩余事件直到通道关闭，丢弃 stdout
    pub async fn wait_closed(&mut self) {
        while !self.closed {
            self.pending.clear();
            match self.events.recv().await {
                Some(event) => self.apply(event),
                None => self.closed = true,
            }
        }
    }

    fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Stdout(data) => self.pending = data,
            ChannelEvent::Stderr(data) => self.stderr.extend_from_slice(&data),
            ChannelEvent::ExitStatus(code) => self.exit_status = Some(code),
            ChannelEvent::ExitSignal(signal) => self.exit_signal = Some(signal),
            ChannelEvent::Eof => {}
        }
    }

    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "remote channel closed")
    }
}

impl AsyncBufRead for RemoteChannel {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        while this.pending.is_empty() && !this.closed {
            match ready!(this.events.poll_recv(cx)) {
                Some(event) => this.apply(event),
                None => this.closed = true,
            }
        }
        Poll::Ready(Ok(&this.pending[..]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        let amt = amt.min(this.pending.len());
        this.pending.advance(amt);
    }
}

impl AsyncRead for RemoteChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let chunk = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = chunk.len().min(buf.remaining());
        buf.put_slice(&chunk[..n]);
        self.consume(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RemoteChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.eof_sent {
            return Poll::Ready(Err(Self::broken_pipe()));
        }
        ready!(this.control.poll_reserve(cx)).map_err(|_| Self::broken_pipe())?;
        this.control
            .send_item(ChannelControl::Data(Bytes::copy_from_slice(buf)))
            .map_err(|_| Self::broken_pipe())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // 数据在 poll_write 时已按顺序交给传输端
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.eof_sent {
            return Poll::Ready(Ok(()));
        }
        ready!(this.control.poll_reserve(cx)).map_err(|_| Self::broken_pipe())?;
        this.control
            .send_item(ChannelControl::Eof)
            .map_err(|_| Self::broken_pipe())?;
        this.eof_sent = true;
        Poll::Ready(Ok(()))
    }
}

impl ChannelEndpoint {
    /// 发送事件；本地端已丢弃时返回 false
    pub async fn send(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn stdout(&self, data: impl Into<Bytes>) -> bool {
        self.send(ChannelEvent::Stdout(data.into())).await
    }

    pub async fn stderr(&self, data: impl Into<Bytes>) -> bool {
        self.send(ChannelEvent::Stderr(data.into())).await
    }

    pub async fn exit(&self, code: u32) -> bool {
        self.send(ChannelEvent::ExitStatus(code)).await
    }

    /// 接收下一条控制消息；None 表示本地端已丢弃（通道应关闭）
    pub async fn recv(&mut self) -> Option<ChannelControl> {
        self.control.recv().await
    }

    /// 等待本地端丢弃事件接收器
    pub async fn closed(&self) {
        self.events.closed().await
    }

    /// 本地端是否已丢弃
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_stdout_until_closed() {
        let (mut channel, endpoint) = RemoteChannel::pair(4);
        tokio::spawn(async move {
            endpoint.stdout("hello ").await;
            endpoint.stderr("warn").await;
            endpoint.stdout("world").await;
            endpoint.send(ChannelEvent::Eof).await;
            endpoint.exit(3).await;
        });

        let mut out = String::new();
        channel.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(channel.exit_status(), Some(3));
        assert_eq!(channel.stderr(), b"warn");
        let err = channel.process_result().unwrap_err();
        assert_eq!(err.exit_code, 3);
        assert_eq!(err.message.as_deref(), Some("warn"));
    }

    #[tokio::test]
    async fn test_write_and_shutdown() {
        let (mut channel, mut endpoint) = RemoteChannel::pair(4);
        channel.write_all(b"\0").await.unwrap();
        channel.shutdown().await.unwrap();
        assert_eq!(
            endpoint.recv().await,
            Some(ChannelControl::Data(Bytes::from_static(b"\0")))
        );
        assert_eq!(endpoint.recv().await, Some(ChannelControl::Eof));
        assert!(channel.write_all(b"x").await.is_err());

        drop(channel);
        assert_eq!(endpoint.recv().await, None);
        assert!(endpoint.is_closed());
    }

    #[tokio::test]
    async fn test_missing_exit_status_is_failure() {
        let (mut channel, endpoint) = RemoteChannel::pair(4);
        tokio::spawn(async move {
            endpoint
                .send(ChannelEvent::ExitSignal("KILL".to_string()))
                .await;
        });
        channel.wait_closed().await;
        let err = channel.process_result().unwrap_err();
        assert_eq!(err.exit_code, -1);
        assert_eq!(err.message.as_deref(), Some("terminated by signal KILL"));
    }
}
