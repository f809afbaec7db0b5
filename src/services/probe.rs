// 远程环境探测

use tracing::debug;

use crate::models::{ConnectionSettings, RemoteHost};
use crate::ssh::{Connection, HostKeyInfo, RusshConnector, SshError};
use crate::utils::escape::escape;

/// 执行命令，失败时记录日志并返回 None
pub async fn try_execute(connection: &Connection, command: &str) -> Option<String> {
    match connection.execute(command).await {
        Ok(output) => Some(output),
        Err(e) => {
            debug!("[Probe] `{}` failed: {}", command, e);
            None
        }
    }
}

/// 远端操作系统名称（`uname -o`）
pub async fn os_name(connection: &Connection) -> Option<String> {
    try_execute(connection, "uname -o").await
}

/// 远端是否存在某个命令
pub async fn is_command_available(connection: &Connection, name: &str) -> Result<bool, SshError> {
    match connection
        .execute(&format!("command -v {}", escape(name)))
        .await
    {
        Ok(_) => Ok(true),
        Err(SshError::RemoteProcess(e)) if e.exit_code == 1 || e.is_command_not_found() => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// 命令补全候选（bash `compgen`），以 '-' 开头的前缀不补全
pub async fn command_completion(connection: &Connection, prefix: &str) -> Option<Vec<String>> {
    if prefix.starts_with('-') {
        return None;
    }
    let output = try_execute(connection, &format!("compgen -abcdefk {}", escape(prefix))).await?;

    let mut candidates: Vec<String> = Vec::new();
    for line in output.lines().filter(|line| !line.is_empty()) {
        if !candidates.iter().any(|c| c == line) {
            candidates.push(line.to_string());
        }
    }
    Some(candidates)
}

/// 连接前获取服务器公钥指纹（不认证）
pub async fn fetch_host_key(
    host: &RemoteHost,
    settings: &ConnectionSettings,
) -> Result<HostKeyInfo, SshError> {
    RusshConnector::new(settings.clone())
        .fetch_host_key(&host.hostname, host.port)
        .await
}
