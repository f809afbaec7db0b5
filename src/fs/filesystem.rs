// 远程文件系统
//
// 所有操作都转换为 shell 命令（ls / mv / rm / mkdir / ln / cp），
// 文件内容通过 SCP 传输。每个操作都经由 Connection，断线时自动重连。

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::file::RemoteFile;
use super::listing;
use super::path::RemotePath;
use crate::scp::{self, protocol, ScpSink, ScpSource, DEFAULT_FILE_MODE};
use crate::ssh::{Connection, SshError};

/// ls 的公共参数：长格式、名称加引号、KiB、每行一个
const LS_FLAGS: &str = "-lQk1";

/// 日期固定为 "yyyy-MM-dd HH:mm" 两个字段
const LS_TIME_STYLE: &str = "--time-style=long-iso";

/// 绑定到一个 Connection 的远程文件系统
#[derive(Clone)]
pub struct RemoteFileSystem {
    connection: Arc<Connection>,
}

impl RemoteFileSystem {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    async fn run(&self, command: String) -> Result<String, SshError> {
        debug!("[FS] {}", command);
        self.connection.execute(&command).await
    }

    /// 列出目录内容（含隐藏文件），保持 ls 的顺序
    pub async fn list(&self, dir: &RemotePath) -> Result<Vec<RemotePath>, SshError> {
        let output = self
            .run(format!(
                "ls {}A {} {}",
                LS_FLAGS,
                LS_TIME_STYLE,
                dir.to_shell_arg()
            ))
            .await?;
        Ok(listing::parse_names(&output)
            .into_iter()
            .map(|name| dir.resolve(&name))
            .collect())
    }

    /// 同 list，失败时返回 None
    pub async fn list_or_none(&self, dir: &RemotePath) -> Option<Vec<RemotePath>> {
        match self.list(dir).await {
            Ok(paths) => Some(paths),
            Err(e) => {
                debug!("[FS] list {} failed: {}", dir, e);
                None
            }
        }
    }

    /// 列出目录中的文件条目
    pub async fn list_files(
        &self,
        dir: &RemotePath,
        include_hidden: bool,
    ) -> Result<Vec<RemoteFile>, SshError> {
        let hidden = if include_hidden { "A" } else { "" };
        let output = self
            .run(format!(
                "ls {}{} {} --time=mtime {}",
                LS_FLAGS,
                hidden,
                LS_TIME_STYLE,
                dir.to_shell_arg()
            ))
            .await?;
        Ok(listing::parse_files(&output, dir))
    }

    /// 单个路径的元数据；路径不存在时返回 None
    pub async fn metadata(&self, path: &RemotePath) -> Result<Option<RemoteFile>, SshError> {
        let result = self
            .run(format!(
                "ls -ldQk {} {}",
                LS_TIME_STYLE,
                path.to_shell_arg()
            ))
            .await;
        let output = match result {
            Ok(output) => output,
            Err(SshError::RemoteProcess(e)) => {
                debug!("[FS] metadata {}: {}", path, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let parent = path.parent().unwrap_or_else(RemotePath::root);
        Ok(output
            .lines()
            .find_map(|line| listing::parse_file(line, &parent))
            .map(|mut file| {
                file.path = path.clone();
                file
            }))
    }

    /// 路径是否存在（悬空的符号链接也算存在）
    pub async fn exists(&self, path: &RemotePath) -> Result<bool, SshError> {
        let path = path.to_shell_arg();
        match self
            .run(format!("test -e {} || test -L {}", path, path))
            .await
        {
            Ok(_) => Ok(true),
            Err(SshError::RemoteProcess(e)) if e.exit_code == 1 => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 解析为绝对路径：优先 realpath，失败时使用 readlink -f
    pub async fn canonicalize(&self, path: &RemotePath) -> Result<RemotePath, SshError> {
        let path = path.to_shell_arg();
        let resolved = match self.run(format!("realpath {}", path)).await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("[FS] realpath failed ({}), trying readlink", e);
                self.run(format!("readlink -f {}", path)).await?
            }
        };
        Ok(RemotePath::new(resolved))
    }

    /// 创建目录；must_create 为 false 时目录已存在不算错误
    pub async fn create_directory(
        &self,
        dir: &RemotePath,
        must_create: bool,
    ) -> Result<(), SshError> {
        let flag = if must_create { "" } else { "-p " };
        self.run(format!("mkdir {}{}", flag, dir.to_shell_arg()))
            .await
            .map(drop)
    }

    /// 在 source 处创建指向 target 的符号链接
    pub async fn create_symlink(
        &self,
        source: &RemotePath,
        target: &RemotePath,
    ) -> Result<(), SshError> {
        self.run(format!(
            "ln -s -f -T {} {}",
            target.to_shell_arg(),
            source.to_shell_arg()
        ))
        .await
        .map(drop)
    }

    /// 删除文件或空目录
    pub async fn delete(&self, path: &RemotePath, must_exist: bool) -> Result<(), SshError> {
        self.remove(path, must_exist, false).await
    }

    /// 递归删除
    pub async fn delete_recursively(
        &self,
        path: &RemotePath,
        must_exist: bool,
    ) -> Result<(), SshError> {
        self.remove(path, must_exist, true).await
    }

    async fn remove(
        &self,
        path: &RemotePath,
        must_exist: bool,
        recursive: bool,
    ) -> Result<(), SshError> {
        let mut command = String::from("rm -d ");
        command.push_str(if must_exist {
            "--interactive=never "
        } else {
            "-f "
        });
        if recursive {
            command.push_str("-r ");
        }
        command.push_str(&path.to_shell_arg());
        self.run(command).await.map(drop)
    }

    pub async fn copy(&self, source: &RemotePath, target: &RemotePath) -> Result<(), SshError> {
        self.run(format!(
            "cp -r -f -T {} {}",
            source.to_shell_arg(),
            target.to_shell_arg()
        ))
        .await
        .map(drop)
    }

    /// 移动（同一文件系统内为原子 rename）
    pub async fn atomic_move(
        &self,
        source: &RemotePath,
        target: &RemotePath,
    ) -> Result<(), SshError> {
        self.run(format!(
            "mv -f -T {} {}",
            source.to_shell_arg(),
            target.to_shell_arg()
        ))
        .await
        .map(drop)
    }

    /// 打开远程文件用于读取
    pub async fn source(&self, file: &RemotePath) -> Result<ScpSource, SshError> {
        let channel = self
            .connection
            .open_channel(&format!("scp -f {}", file.to_shell_arg()))
            .await?;
        Ok(ScpSource::start(channel).await?)
    }

    /// 打开远程文件用于写入，shutdown 时上传
    ///
    /// must_create 为 true 且文件已存在时失败。
    pub async fn sink(&self, file: &RemotePath, must_create: bool) -> Result<ScpSink, SshError> {
        protocol::check_file_name(file.last_segment())?;
        if must_create && self.exists(file).await? {
            return Err(SshError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", file),
            )));
        }
        let channel = self
            .connection
            .open_channel(&format!("scp -t {}", file.to_shell_arg()))
            .await?;
        Ok(ScpSink::new(channel, file.last_segment(), DEFAULT_FILE_MODE))
    }

    /// 把 reader 中的 length 字节写入远程文件
    pub async fn write_from<R>(
        &self,
        file: &RemotePath,
        length: u64,
        reader: &mut R,
    ) -> Result<u64, SshError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        protocol::check_file_name(file.last_segment())?;
        let channel = self
            .connection
            .open_channel(&format!("scp -t {}", file.to_shell_arg()))
            .await?;
        Ok(scp::upload(channel, file.last_segment(), DEFAULT_FILE_MODE, length, reader).await?)
    }

    /// 读取整个远程文件
    pub async fn read_to_vec(&self, file: &RemotePath) -> Result<Vec<u8>, SshError> {
        let mut source = self.source(file).await?;
        let mut data = Vec::with_capacity(usize::try_from(source.length()).unwrap_or(0));
        source
            .read_to_end(&mut data)
            .await
            .map_err(SshError::from_io)?;
        Ok(data)
    }
}
