// sshlink - SSH 远程控制命令行
// 应用入口

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sshlink::fs::RemotePath;
use sshlink::models::{AppSettings, RemoteHost};
use sshlink::services::{probe, storage, FileManager, HostStore};
use sshlink::ssh::{Connection, ConnectionManager, RusshConnector};

#[derive(Parser)]
#[command(name = "sshlink", version, about = "SSH 远程命令与 SCP 文件传输")]
struct Cli {
    /// 已保存主机的 ID
    #[arg(long, conflicts_with = "host")]
    id: Option<i64>,

    /// 主机名或 IP
    #[arg(short = 'H', long)]
    host: Option<String>,

    #[arg(short, long, default_value_t = RemoteHost::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "root")]
    user: String,

    /// 密码（未指定时读取 SSHLINK_PASSWORD）
    #[arg(long)]
    password: Option<String>,

    /// 输出 DEBUG 日志
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 执行命令并输出结果
    Exec { command: String },
    /// 逐行输出长时间运行命令的结果
    Stream { command: String },
    /// 列出远程目录
    Ls {
        #[arg(default_value = "~")]
        dir: String,
        /// 包含隐藏文件
        #[arg(short, long)]
        all: bool,
    },
    /// 下载远程文件
    Get { remote: String, local: PathBuf },
    /// 上传本地文件
    Put { local: PathBuf, remote: String },
    /// 显示远端系统信息与 XDG 用户目录
    Info,
    /// 显示服务器公钥指纹
    Hostkey,
    /// 保存主机
    Save {
        #[arg(long)]
        alias: Option<String>,
    },
    /// 列出已保存的主机
    Hosts,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_host(cli: &Cli, store: &HostStore) -> Result<RemoteHost> {
    if let Some(id) = cli.id {
        return store.get(id).with_context(|| format!("没有 ID 为 {} 的主机", id));
    }
    let Some(hostname) = cli.host.clone() else {
        bail!("需要 --host 或 --id");
    };
    let password = match &cli.password {
        Some(password) => password.clone(),
        None => std::env::var("SSHLINK_PASSWORD").unwrap_or_default(),
    };
    let host = RemoteHost::new(hostname, cli.port, cli.user.clone(), password);
    host.validate().map_err(anyhow::Error::msg)?;
    Ok(host)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = storage::load_settings().unwrap_or_else(|e| {
        eprintln!("加载设置失败，使用默认值: {:#}", e);
        AppSettings::default()
    });
    init_logging(cli.verbose || settings.logging.verbose);

    let store = HostStore::open_default()?;
    match &cli.command {
        Command::Hosts => {
            for host in store.list() {
                println!(
                    "{}\t{}\t{}@{}",
                    host.local_id,
                    host.display_name(),
                    host.username,
                    host.address()
                );
            }
            return Ok(());
        }
        Command::Save { alias } => {
            let mut host = resolve_host(&cli, &store)?;
            if let Some(alias) = alias {
                host = host.with_alias(alias.clone());
            }
            let host = store.store(host)?;
            println!("已保存主机 {}", host.local_id);
            return Ok(());
        }
        Command::Hostkey => {
            let host = resolve_host(&cli, &store)?;
            let key = probe::fetch_host_key(&host, &settings.connection).await?;
            println!("{} {}", key.algorithm, key.fingerprint);
            return Ok(());
        }
        _ => {}
    }

    let host = resolve_host(&cli, &store)?;
    let shutdown = CancellationToken::new();
    let connector = Arc::new(RusshConnector::new(settings.connection.clone()));
    let manager = ConnectionManager::new(connector, settings.connection.clone(), shutdown.clone());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在断开连接");
            ctrl_c.cancel();
        }
    });

    let connection = manager.connect(host).await?;
    info!("已连接到 {}", connection.host().display_name());

    let result = tokio::select! {
        result = run(&cli.command, &connection, settings.files.show_hidden) => result,
        _ = shutdown.cancelled() => Err(anyhow::anyhow!("已取消")),
    };

    manager.disconnect(None);
    shutdown.cancel();
    result
}

async fn run(command: &Command, connection: &Arc<Connection>, show_hidden: bool) -> Result<()> {
    match command {
        Command::Exec { command } => {
            let output = connection.execute(command).await?;
            println!("{}", output);
        }
        Command::Stream { command } => {
            let mut lines = connection.execute_continuously(command).await?;
            while let Some(line) = lines.next().await {
                println!("{}", line?);
            }
        }
        Command::Ls { dir, all } => {
            let files = FileManager::new(connection.clone());
            let dir = files.resolve_path(dir).await?;
            for file in files.list_files(&dir, *all || show_hidden).await? {
                let tag = file.xdg_user_dir.map(|d| d.as_str()).unwrap_or("");
                println!(
                    "{:>12} {:<24} {} {}",
                    file.size,
                    file.mime_type.as_str(),
                    file.name(),
                    tag
                );
            }
        }
        Command::Get { remote, local } => {
            let mut source = connection.filesystem().source(&RemotePath::new(remote)).await?;
            let mut file = tokio::fs::File::create(local)
                .await
                .with_context(|| format!("无法创建 {}", local.display()))?;
            let copied = tokio::io::copy(&mut source, &mut file).await?;
            file.flush().await?;
            info!("已下载 {} 字节", copied);
        }
        Command::Put { local, remote } => {
            let mut file = tokio::fs::File::open(local)
                .await
                .with_context(|| format!("无法打开 {}", local.display()))?;
            let length = file.metadata().await?.len();
            let sent = connection
                .filesystem()
                .write_from(&RemotePath::new(remote), length, &mut file)
                .await?;
            info!("已上传 {} 字节", sent);
        }
        Command::Info => {
            let files = FileManager::new(connection.clone());
            let os = probe::os_name(connection).await;
            println!("系统: {}", os.as_deref().unwrap_or("未知"));
            println!("主目录: {}", files.user_home().await?);
            for (dir, path) in files.xdg_user_dirs().await? {
                if let Some(path) = path {
                    println!("{:<12} {}", dir.as_str(), path);
                }
            }
        }
        Command::Hostkey | Command::Save { .. } | Command::Hosts => {}
    }
    Ok(())
}
