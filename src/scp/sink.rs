// SCP 上传（scp -t）
//
// 握手：
// 1. 远端就绪后发送 0x00
// 2. 发送 "Cmmmm <length> <name>\n"，等待确认
// 3. 发送 length 字节正文与一个 0x00，等待最终确认
// 4. 关闭 stdin，等待远端退出

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::error::ScpError;
use super::protocol::{self, ACK};
use crate::ssh::RemoteChannel;

/// 在执行 `scp -t <path>` 的通道上上传 length 字节
///
/// reader 提前结束时返回错误，远端不会创建不完整的文件。
pub async fn upload<R>(
    mut channel: RemoteChannel,
    file_name: &str,
    mode: u32,
    length: u64,
    reader: &mut R,
) -> Result<u64, ScpError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = protocol::format_c_line(mode, length, file_name)?;
    protocol::read_ack(&mut channel).await?;

    channel.write_all(header.as_bytes()).await?;
    protocol::read_ack(&mut channel).await?;

    let copied = tokio::io::copy(&mut (&mut *reader).take(length), &mut channel).await?;
    if copied != length {
        return Err(ScpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source ended after {} of {} bytes", copied, length),
        )));
    }
    channel.write_all(&[ACK]).await?;
    protocol::read_ack(&mut channel).await?;

    channel.shutdown().await?;
    channel.wait_closed().await;
    if let Err(e) = channel.process_result() {
        if e.exit_code != -1 {
            return Err(ScpError::Remote(e.to_string()));
        }
    }

    debug!("[SCP] Sent {} ({} bytes)", file_name, copied);
    Ok(copied)
}

enum SinkState {
    Buffering(RemoteChannel, Vec<u8>),
    Uploading(BoxFuture<'static, Result<u64, ScpError>>),
    Finished,
}

/// 远程文件的写入端
///
/// 写入的数据先缓存在内存中（SCP 需要预先声明长度），
/// shutdown 时执行上传握手。未 shutdown 就丢弃时远端文件保持不变。
pub struct ScpSink {
    file_name: String,
    mode: u32,
    state: SinkState,
}

impl ScpSink {
    pub fn new(channel: RemoteChannel, file_name: impl Into<String>, mode: u32) -> Self {
        Self {
            file_name: file_name.into(),
            mode,
            state: SinkState::Buffering(channel, Vec::new()),
        }
    }

    fn finished() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "scp sink already closed")
    }
}

impl AsyncWrite for ScpSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().state {
            SinkState::Buffering(_, data) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(Self::finished())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                SinkState::Buffering(..) => {
                    let SinkState::Buffering(channel, data) =
                        std::mem::replace(&mut this.state, SinkState::Finished)
                    else {
                        continue;
                    };
                    let file_name = this.file_name.clone();
                    let mode = this.mode;
                    let transfer = async move {
                        let length = data.len() as u64;
                        let mut body = &data[..];
                        upload(channel, &file_name, mode, length, &mut body).await
                    };
                    this.state = SinkState::Uploading(transfer.boxed());
                }
                SinkState::Uploading(upload) => {
                    let result = ready!(upload.poll_unpin(cx));
                    this.state = SinkState::Finished;
                    return Poll::Ready(result.map(|_| ()).map_err(io::Error::from));
                }
                SinkState::Finished => return Poll::Ready(Ok(())),
            }
        }
    }
}
