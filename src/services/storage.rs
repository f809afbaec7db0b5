// 本地数据持久化服务

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{AppSettings, RemoteHost};

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/sshlink
/// Linux: ~/.config/sshlink
/// Windows: C:\Users\<用户名>\AppData\Roaming\sshlink
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("sshlink");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("无法创建配置目录")?;
    }
    Ok(config_dir)
}

// ======================== Settings 配置持久化 ========================

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载应用设置
pub fn load_settings() -> Result<AppSettings> {
    load_settings_from(&get_settings_file()?)
}

pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = fs::read_to_string(path).context("无法读取设置配置文件")?;
    let settings: AppSettings = serde_json::from_str(&content).context("无法解析设置配置文件")?;
    Ok(settings)
}

/// 保存应用设置
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    save_settings_to(&get_settings_file()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("无法序列化设置配置")?;
    fs::write(path, content).context("无法写入设置配置文件")?;
    Ok(())
}

// ======================== 主机持久化 ========================

/// 获取主机配置文件路径
pub fn get_hosts_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("hosts.json"))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HostsFile {
    #[serde(default)]
    next_id: i64,
    #[serde(default)]
    hosts: Vec<RemoteHost>,
}

/// 已保存主机的仓库
///
/// 每次修改都会写回 JSON 文件，并通过 watch 通道推送最新列表。
pub struct HostStore {
    path: PathBuf,
    data: Mutex<HostsFile>,
    hosts_tx: watch::Sender<Vec<RemoteHost>>,
}

impl HostStore {
    /// 打开默认位置的主机仓库
    pub fn open_default() -> Result<Self> {
        Self::open(get_hosts_file()?)
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut data = if path.exists() {
            let content = fs::read_to_string(&path).context("无法读取主机配置文件")?;
            serde_json::from_str::<HostsFile>(&content).context("无法解析主机配置文件")?
        } else {
            HostsFile::default()
        };
        // 文件被手动编辑过时保证新 id 不与现有记录冲突
        let max_id = data.hosts.iter().map(|h| h.local_id).max().unwrap_or(0);
        data.next_id = data.next_id.max(max_id);

        let (hosts_tx, _) = watch::channel(data.hosts.clone());
        Ok(Self {
            path,
            data: Mutex::new(data),
            hosts_tx,
        })
    }

    pub fn get(&self, id: i64) -> Option<RemoteHost> {
        self.with_data(|data| data.hosts.iter().find(|h| h.local_id == id).cloned())
    }

    pub fn list(&self) -> Vec<RemoteHost> {
        self.hosts_tx.borrow().clone()
    }

    /// 实时更新的主机列表
    pub fn subscribe(&self) -> watch::Receiver<Vec<RemoteHost>> {
        self.hosts_tx.subscribe()
    }

    /// 保存主机，local_id 为 0 时分配新 id；返回保存后的记录
    pub fn store(&self, mut host: RemoteHost) -> Result<RemoteHost> {
        self.update(|data| {
            if host.is_unsaved() {
                data.next_id += 1;
                host.local_id = data.next_id;
            }
            match data.hosts.iter_mut().find(|h| h.local_id == host.local_id) {
                Some(existing) => *existing = host.clone(),
                None => data.hosts.push(host.clone()),
            }
        })?;
        debug!("[Storage] Stored host {}", host.local_id);
        Ok(host)
    }

    /// 删除主机，返回是否存在
    pub fn delete(&self, id: i64) -> Result<bool> {
        let mut removed = false;
        self.update(|data| {
            let before = data.hosts.len();
            data.hosts.retain(|h| h.local_id != id);
            removed = data.hosts.len() != before;
        })?;
        Ok(removed)
    }

    fn with_data<T>(&self, f: impl FnOnce(&HostsFile) -> T) -> T {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&data)
    }

    fn update(&self, f: impl FnOnce(&mut HostsFile)) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut data);

        let content = serde_json::to_string_pretty(&*data).context("无法序列化主机配置")?;
        fs::write(&self.path, content).context("无法写入主机配置文件")?;
        self.hosts_tx.send_replace(data.hosts.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HostStore::open(dir.path().join("hosts.json")).unwrap();
        let mut rx = store.subscribe();

        let first = store
            .store(RemoteHost::new("10.0.0.1", 22, "root", "pw"))
            .unwrap();
        let second = store
            .store(RemoteHost::new("10.0.0.2", 2222, "pi", "pw"))
            .unwrap();
        assert_eq!(first.local_id, 1);
        assert_eq!(second.local_id, 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);

        let renamed = first.clone().with_alias("gateway");
        store.store(renamed).unwrap();
        assert_eq!(store.get(1).unwrap().display_name(), "gateway");
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_reopen_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        {
            let store = HostStore::open(&path).unwrap();
            store.store(RemoteHost::new("a", 22, "u", "s")).unwrap();
            store.store(RemoteHost::new("b", 22, "u", "s")).unwrap();
            assert!(store.delete(1).unwrap());
            assert!(!store.delete(1).unwrap());
        }

        let store = HostStore::open(&path).unwrap();
        assert_eq!(store.get(1), None);
        assert_eq!(store.get(2).unwrap().hostname, "b");
        let third = store.store(RemoteHost::new("c", 22, "u", "s")).unwrap();
        assert_eq!(third.local_id, 3);
    }

    #[test]
    fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert!(!load_settings_from(&path).unwrap().files.show_hidden);

        let mut settings = AppSettings::default();
        settings.files.show_hidden = true;
        settings.connection.exec_timeout_secs = 12;
        save_settings_to(&path, &settings).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert!(loaded.files.show_hidden);
        assert_eq!(loaded.connection.exec_timeout_secs, 12);
    }
}
