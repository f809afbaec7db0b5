// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;

use russh::client::DisconnectReason;
use russh::keys::PublicKey;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::client::LinkMonitor;

/// 服务器主机密钥信息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostKeyInfo {
    /// 密钥算法（如 ssh-ed25519）
    pub algorithm: String,
    /// SHA-256 指纹
    pub fingerprint: String,
}

/// SSH 客户端 Handler
/// 记录主机密钥，并在传输断开时通知 LinkMonitor
pub struct SshClientHandler {
    /// 服务器主机名（用于日志）
    host: String,
    /// 断线监视器
    monitor: LinkMonitor,
    /// 主机密钥回传（仅用于密钥探测）
    host_key_tx: Option<oneshot::Sender<HostKeyInfo>>,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String, monitor: LinkMonitor) -> Self {
        Self {
            host,
            monitor,
            host_key_tx: None,
        }
    }

    /// 握手时把服务器主机密钥发送给 tx
    pub fn with_host_key_capture(mut self, tx: oneshot::Sender<HostKeyInfo>) -> Self {
        self.host_key_tx = Some(tx);
        self
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 接受服务器公钥并记录指纹（不校验 known_hosts）
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let info = HostKeyInfo {
            algorithm: server_public_key.algorithm().to_string(),
            fingerprint: server_public_key
                .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
                .to_string(),
        };

        info!(
            "[SSH] [{}] Server key {} {}",
            self.host, info.algorithm, info.fingerprint
        );

        if let Some(tx) = self.host_key_tx.take() {
            let _ = tx.send(info);
        }

        async { Ok(true) }
    }

    /// 传输断开（对端断开、心跳超时或网络错误）
    fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        match &reason {
            DisconnectReason::ReceivedDisconnect(_) => {
                debug!("[SSH] [{}] Server closed the connection", self.host);
            }
            DisconnectReason::Error(e) => {
                warn!("[SSH] [{}] Connection lost: {}", self.host, e);
            }
        }
        self.monitor.connection_lost();

        async move {
            match reason {
                DisconnectReason::ReceivedDisconnect(_) => Ok(()),
                DisconnectReason::Error(e) => Err(e),
            }
        }
    }
}
