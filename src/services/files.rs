// 远程文件浏览服务

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::fs::{MimeType, RemoteFile, RemoteFileSystem, RemotePath, XdgUserDir};
use crate::ssh::{Connection, SshError};
use crate::utils::escape::{escape, unescape};

/// 文件浏览服务
///
/// 在 RemoteFileSystem 之上提供路径解析、XDG 用户目录与文件类型探测。
pub struct FileManager {
    connection: Arc<Connection>,
    filesystem: RemoteFileSystem,
    /// 路径 -> XDG 用户目录（首次列目录时获取）
    user_dirs: OnceCell<HashMap<RemotePath, XdgUserDir>>,
}

impl FileManager {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            filesystem: connection.filesystem(),
            connection,
            user_dirs: OnceCell::new(),
        }
    }

    pub fn filesystem(&self) -> &RemoteFileSystem {
        &self.filesystem
    }

    /// 解析为绝对路径（realpath，失败时 readlink -f）
    pub async fn resolve_path(&self, path: &str) -> Result<RemotePath, SshError> {
        let resolved = self.filesystem.canonicalize(&RemotePath::new(path)).await?;
        Ok(RemotePath::new(unescape(resolved.as_str())))
    }

    /// 用户主目录
    pub async fn user_home(&self) -> Result<RemotePath, SshError> {
        let home = self.connection.execute("xdg-user-dir").await?;
        Ok(RemotePath::new(home))
    }

    pub async fn xdg_user_dir(&self, dir: XdgUserDir) -> Result<RemotePath, SshError> {
        let path = self
            .connection
            .execute(&format!("xdg-user-dir {}", dir.as_str()))
            .await?;
        Ok(RemotePath::new(unescape(&path)))
    }

    /// 所有 XDG 用户目录；与主目录相同（未配置）的为 None
    pub async fn xdg_user_dirs(
        &self,
    ) -> Result<BTreeMap<XdgUserDir, Option<RemotePath>>, SshError> {
        let home = self.user_home().await?;
        let lookups = XdgUserDir::ALL.map(|dir| async move { (dir, self.xdg_user_dir(dir).await) });

        let mut dirs = BTreeMap::new();
        for (dir, path) in join_all(lookups).await {
            let path = path?;
            dirs.insert(dir, (path != home).then_some(path));
        }
        Ok(dirs)
    }

    async fn user_dirs_by_path(&self) -> &HashMap<RemotePath, XdgUserDir> {
        self.user_dirs
            .get_or_init(|| async {
                match self.xdg_user_dirs().await {
                    Ok(dirs) => dirs
                        .into_iter()
                        .filter_map(|(dir, path)| path.map(|path| (path, dir)))
                        .collect(),
                    Err(e) => {
                        warn!("[FS] Failed to query XDG user dirs: {}", e);
                        HashMap::new()
                    }
                }
            })
            .await
    }

    /// 通过 `file` 命令探测文件类型，失败时为 UNKNOWN
    pub async fn file_type(&self, path: &str) -> MimeType {
        match self
            .connection
            .execute(&format!("file -bNr --mime-type {}", escape(path)))
            .await
        {
            Ok(output) => MimeType::parse(&output).unwrap_or_else(MimeType::unknown),
            Err(e) => {
                debug!("[FS] file type of {} unavailable: {}", path, e);
                MimeType::unknown()
            }
        }
    }

    /// 列出目录，并标注 XDG 用户目录
    pub async fn list_files(
        &self,
        dir: &RemotePath,
        include_hidden: bool,
    ) -> Result<Vec<RemoteFile>, SshError> {
        let user_dirs = self.user_dirs_by_path().await;
        let mut files = self.filesystem.list_files(dir, include_hidden).await?;
        for file in &mut files {
            file.xdg_user_dir = user_dirs.get(&file.path).copied();
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionSettings, RemoteHost};
    use crate::ssh::testing::FakeConnector;

    async fn manager(fake: &Arc<FakeConnector>) -> FileManager {
        let host = RemoteHost::new("fake", 22, "user", "secret");
        let connection = Connection::open(host, fake.clone(), ConnectionSettings::default())
            .await
            .unwrap();
        FileManager::new(connection)
    }

    fn with_xdg_dirs(fake: &FakeConnector) {
        fake.respond("xdg-user-dir", "/home/alice\n", "", 0);
        fake.respond("xdg-user-dir DOCUMENTS", "/home/alice/Documents\n", "", 0);
        fake.respond("xdg-user-dir MUSIC", "/home/alice/Music\n", "", 0);
    }

    #[tokio::test]
    async fn test_xdg_user_dirs_drop_home() {
        let fake = Arc::new(FakeConnector::new());
        with_xdg_dirs(&fake);
        let files = manager(&fake).await;

        let dirs = files.xdg_user_dirs().await.unwrap();
        assert_eq!(dirs.len(), XdgUserDir::ALL.len());
        assert_eq!(
            dirs[&XdgUserDir::Documents],
            Some(RemotePath::new("/home/alice/Documents"))
        );
        assert_eq!(dirs[&XdgUserDir::Desktop], None);
    }

    #[tokio::test]
    async fn test_list_files_tags_user_dirs() {
        let fake = Arc::new(FakeConnector::new());
        with_xdg_dirs(&fake);
        fake.respond(
            "ls -lQk1",
            "total 8\n\
             drwxr-xr-x 2 alice alice 4 2024-01-15 10:30 \"Documents\"\n\
             -rw-r--r-- 1 alice alice 1 2024-01-15 10:30 \"notes.md\"\n",
            "",
            0,
        );
        let files = manager(&fake).await;

        let listed = files
            .list_files(&RemotePath::new("/home/alice"), false)
            .await
            .unwrap();
        assert_eq!(listed[0].xdg_user_dir, Some(XdgUserDir::Documents));
        assert_eq!(listed[1].xdg_user_dir, None);
        assert!(fake
            .commands()
            .contains(&"ls -lQk1 --time-style=long-iso --time=mtime '/home/alice'".to_string()));
    }

    #[tokio::test]
    async fn test_file_type() {
        let fake = Arc::new(FakeConnector::new());
        fake.respond("file -bNr --mime-type '/tmp/a.png'", "image/png\n", "", 0);
        let files = manager(&fake).await;

        assert!(files.file_type("/tmp/a.png").await.is_image());
        assert_eq!(files.file_type("/tmp/missing").await, MimeType::unknown());
    }

    #[tokio::test]
    async fn test_resolve_path_unescapes() {
        let fake = Arc::new(FakeConnector::new());
        fake.respond("realpath", "/srv/caf\\303\\251\n", "", 0);
        let files = manager(&fake).await;

        let path = files.resolve_path("/srv/café").await.unwrap();
        assert_eq!(path.as_str(), "/srv/café");
    }
}
