// 测试用的内存传输
//
// FakeConnector 模拟一台远程主机：命令按前缀匹配到脚本，
// 未匹配的命令按简单 shell 语义处理（echo / true / false / 127）。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::channel::{ChannelEndpoint, RemoteChannel};
use super::client::{Connector, LinkMonitor, Transport};
use super::error::SshError;
use crate::models::RemoteHost;

/// 命令脚本：接收完整命令行与传输端
pub type Script = Arc<dyn Fn(String, ChannelEndpoint) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Remote {
    scripts: Mutex<Vec<(String, Script)>>,
    commands: Mutex<Vec<String>>,
}

impl Remote {
    fn script_for(&self, command: &str) -> Option<Script> {
        let scripts = self.scripts.lock().unwrap();
        scripts
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    remote: Arc<Remote>,
    connects: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
    fail_auth: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    monitors: Mutex<Vec<LinkMonitor>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为以 prefix 开头的命令注册脚本（后注册的优先）
    pub fn on<F, Fut>(&self, prefix: &str, script: F)
    where
        F: Fn(String, ChannelEndpoint) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let script: Script = Arc::new(move |command, endpoint| Box::pin(script(command, endpoint)));
        self.remote
            .scripts
            .lock()
            .unwrap()
            .push((prefix.to_string(), script));
    }

    /// 为以 prefix 开头的命令注册固定输出
    pub fn respond(&self, prefix: &str, stdout: &str, stderr: &str, code: u32) {
        let stdout = stdout.to_string();
        let stderr = stderr.to_string();
        self.on(prefix, move |_, endpoint| {
            let stdout = stdout.clone();
            let stderr = stderr.clone();
            async move { reply(&endpoint, stdout.as_bytes(), stderr.as_bytes(), code).await }
        });
    }

    pub fn fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// 执行过的命令行
    pub fn commands(&self) -> Vec<String> {
        self.remote.commands.lock().unwrap().clone()
    }

    /// 模拟最近一次建立的传输断开
    pub fn drop_link(&self) {
        if let Some(monitor) = self.monitors.lock().unwrap().last() {
            monitor.connection_lost();
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        host: &RemoteHost,
        monitor: LinkMonitor,
    ) -> Result<Arc<dyn Transport>, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(SshError::Auth(format!(
                "Password authentication failed for {}",
                host.username
            )));
        }
        self.monitors.lock().unwrap().push(monitor);
        Ok(Arc::new(FakeTransport {
            remote: self.remote.clone(),
            disconnects: self.disconnects.clone(),
        }))
    }
}

struct FakeTransport {
    remote: Arc<Remote>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_exec(&self, command: &str) -> Result<RemoteChannel, SshError> {
        self.remote
            .commands
            .lock()
            .unwrap()
            .push(command.to_string());
        let (channel, endpoint) = RemoteChannel::pair(8);
        let command = command.to_string();
        match self.remote.script_for(&command) {
            Some(script) => {
                tokio::spawn(script(command, endpoint));
            }
            None => {
                tokio::spawn(default_shell(command, endpoint));
            }
        }
        Ok(channel)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

async fn default_shell(command: String, endpoint: ChannelEndpoint) {
    let program = command.split_whitespace().next().unwrap_or_default();
    match program {
        "echo" => {
            let rest = command.trim_start_matches("echo").trim_start();
            reply(&endpoint, format!("{}\n", rest).as_bytes(), b"", 0).await
        }
        "true" => reply(&endpoint, b"", b"", 0).await,
        "false" => reply(&endpoint, b"", b"", 1).await,
        _ => {
            let stderr = format!("sh: 1: {}: not found\n", program);
            reply(&endpoint, b"", stderr.as_bytes(), 127).await
        }
    }
}

/// 发送完整的命令结果并关闭通道
pub async fn reply(endpoint: &ChannelEndpoint, stdout: &[u8], stderr: &[u8], code: u32) {
    if !stdout.is_empty() {
        endpoint.stdout(stdout.to_vec()).await;
    }
    if !stderr.is_empty() {
        endpoint.stderr(stderr.to_vec()).await;
    }
    endpoint.exit(code).await;
}

/// 轮询直到条件成立（最多约 2 秒）
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not met in time");
}
