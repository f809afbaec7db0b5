// SCP 下载（scp -f）

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use super::error::ScpError;
use super::protocol::{self, FileHeader, ACK};
use crate::ssh::RemoteChannel;

/// 远程文件的字节流
///
/// 读取完 header 声明的字节数后发送最后的确认字节并报告 EOF。
/// 丢弃即关闭通道。
pub struct ScpSource {
    channel: RemoteChannel,
    header: FileHeader,
    available: u64,
    final_ack_sent: bool,
}

impl ScpSource {
    /// 在执行 `scp -f <path>` 的通道上完成握手
    pub async fn start(mut channel: RemoteChannel) -> Result<Self, ScpError> {
        channel.write_all(&[ACK]).await?;
        channel.flush().await?;

        let header = protocol::read_header(&mut channel).await?;
        debug!(
            "[SCP] Receiving {} ({} bytes)",
            header.file_name, header.length
        );

        channel.write_all(&[ACK]).await?;
        channel.flush().await?;

        Ok(Self {
            available: header.length,
            channel,
            header,
            final_ack_sent: false,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.header.file_name
    }

    /// 文件总字节数
    pub fn length(&self) -> u64 {
        self.header.length
    }

    pub fn mode(&self) -> u32 {
        self.header.mode
    }

    /// 尚未读取的字节数
    pub fn remaining(&self) -> u64 {
        self.available
    }

    fn poll_final_ack(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.final_ack_sent {
            return Poll::Ready(Ok(()));
        }
        ready!(Pin::new(&mut self.channel).poll_write(cx, &[ACK]))?;
        self.final_ack_sent = true;
        debug!("[SCP] Received {}", self.header.file_name);
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for ScpSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.available == 0 {
            return this.poll_final_ack(cx);
        }

        let chunk = ready!(Pin::new(&mut this.channel).poll_fill_buf(cx))?;
        if chunk.is_empty() {
            return Poll::Ready(Err(ScpError::RemoteTerminated.into()));
        }
        let limit = usize::try_from(this.available).unwrap_or(usize::MAX);
        let n = chunk.len().min(buf.remaining()).min(limit);
        buf.put_slice(&chunk[..n]);
        Pin::new(&mut this.channel).consume(n);
        this.available -= n as u64;

        if this.available == 0 {
            // 确认字节暂时发不出去时，下一次读取会重试
            if let Poll::Ready(Err(e)) = this.poll_final_ack(cx) {
                return Poll::Ready(Err(e));
            }
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::ssh::{ChannelControl, ChannelEndpoint};

    async fn expect_ack(endpoint: &mut ChannelEndpoint) {
        assert_eq!(
            endpoint.recv().await,
            Some(ChannelControl::Data(Bytes::from_static(&[ACK])))
        );
    }

    #[tokio::test]
    async fn test_download() {
        let (channel, mut endpoint) = RemoteChannel::pair(8);
        let remote = tokio::spawn(async move {
            expect_ack(&mut endpoint).await;
            endpoint.stdout("T1700000000 0 1700000000 0\n").await;
            endpoint.stdout("C0644 11 report.txt\n").await;
            expect_ack(&mut endpoint).await;
            endpoint.stdout("hello ").await;
            endpoint.stdout("world").await;
            expect_ack(&mut endpoint).await;
            endpoint.exit(0).await;
        });

        let mut source = ScpSource::start(channel).await.unwrap();
        assert_eq!(source.file_name(), "report.txt");
        assert_eq!(source.length(), 11);

        let mut body = String::new();
        source.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello world");
        assert_eq!(source.remaining(), 0);
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_file_still_acks() {
        let (channel, mut endpoint) = RemoteChannel::pair(8);
        let remote = tokio::spawn(async move {
            expect_ack(&mut endpoint).await;
            endpoint.stdout("C0644 0 empty\n").await;
            expect_ack(&mut endpoint).await;
            expect_ack(&mut endpoint).await;
        });

        let mut source = ScpSource::start(channel).await.unwrap();
        let mut body = Vec::new();
        source.read_to_end(&mut body).await.unwrap();
        assert!(body.is_empty());
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_during_handshake() {
        let (channel, mut endpoint) = RemoteChannel::pair(8);
        tokio::spawn(async move {
            expect_ack(&mut endpoint).await;
            endpoint
                .stdout("\x01scp: /etc/shadow: Permission denied\n")
                .await;
            endpoint.exit(1).await;
        });

        let err = ScpSource::start(channel).await.err().unwrap();
        assert!(matches!(err, ScpError::Remote(m) if m.ends_with("Permission denied")));
    }

    #[tokio::test]
    async fn test_dropping_source_closes_channel() {
        let (channel, mut endpoint) = RemoteChannel::pair(8);
        let remote = tokio::spawn(async move {
            expect_ack(&mut endpoint).await;
            endpoint.stdout("C0644 1048576 big.bin\n").await;
            expect_ack(&mut endpoint).await;
            endpoint.stdout("abc").await;
            tokio::time::timeout(Duration::from_secs(2), endpoint.closed())
                .await
                .is_ok()
        });

        let mut source = ScpSource::start(channel).await.unwrap();
        let mut buf = [0u8; 3];
        source.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        drop(source);

        assert!(remote.await.unwrap());
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let (channel, mut endpoint) = RemoteChannel::pair(8);
        tokio::spawn(async move {
            expect_ack(&mut endpoint).await;
            endpoint.stdout("C0644 10 short\n").await;
            expect_ack(&mut endpoint).await;
            endpoint.stdout("abc").await;
        });

        let mut source = ScpSource::start(channel).await.unwrap();
        let mut body = Vec::new();
        let err = source.read_to_end(&mut body).await.unwrap_err();
        assert_eq!(body, b"abc");
        assert!(matches!(
            err.get_ref().and_then(|e| e.downcast_ref::<ScpError>()),
            Some(ScpError::RemoteTerminated)
        ));
    }
}
