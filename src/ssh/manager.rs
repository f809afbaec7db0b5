// SSH 连接管理器
//
// 至多一个活动连接，替换与断开都是对活动连接槽的原子交换。

use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::Connector;
use super::error::SshError;
use super::event::{ConnectionEvent, ConnectionEventKind};
use super::session::Connection;
use crate::models::{ConnectionSettings, RemoteHost};

/// 事件广播缓冲大小
const EVENT_CAPACITY: usize = 64;

/// SSH 连接管理器
/// 持有至多一个活动连接，串行化连接、替换与断开
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    /// 活动连接槽（唯一需要同步的共享状态）
    active: watch::Sender<Option<Arc<Connection>>>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// 创建管理器；shutdown 取消时关闭活动连接
    ///
    /// 必须在 Tokio 运行时内调用。
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (active, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(ManagerInner {
            connector,
            settings,
            active,
            events,
            shutdown: shutdown.clone(),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            if let Some(inner) = weak.upgrade() {
                inner.teardown();
            }
        });

        Self { inner }
    }

    /// 连接到 host
    ///
    /// 若活动连接已指向相同主机则直接返回。否则在后台任务中认证，
    /// 成功后原子地替换活动连接并关闭之前的连接；调用方放弃等待不会中断该任务。
    pub fn connect(&self, host: RemoteHost) -> BoxFuture<'static, Result<Arc<Connection>, SshError>> {
        let inner = self.inner.clone();
        async move {
            if let Some(active) = inner.current() {
                if active.host() == &host && !active.is_closed() {
                    debug!(
                        "[SSH Manager] Already connected to {}",
                        host.display_name()
                    );
                    return Ok(active);
                }
            }
            if inner.shutdown.is_cancelled() {
                return Err(SshError::Cancelled);
            }

            let attempt = tokio::spawn(async move {
                info!("[SSH Manager] Connecting to {}...", host.display_name());
                let opened = tokio::select! {
                    opened = Connection::open(host.clone(), inner.connector.clone(), inner.settings.clone()) => opened,
                    _ = inner.shutdown.cancelled() => Err(SshError::Cancelled),
                };
                match opened {
                    Ok(connection) => inner.install(connection),
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!(
                                "[SSH Manager] Failed to connect to {}: {}",
                                host.display_name(),
                                e
                            );
                            inner.publish(
                                "",
                                ConnectionEventKind::Failed {
                                    error: e.to_string(),
                                },
                            );
                        }
                        Err(e)
                    }
                }
            });

            match attempt.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(SshError::Cancelled),
                Err(e) => Err(SshError::Protocol(format!("connect task failed: {}", e))),
            }
        }
        .boxed()
    }

    /// 断开活动连接
    ///
    /// host_id 为 None 或与活动连接的主机 ID 相同时才断开。
    pub fn disconnect(&self, host_id: Option<i64>) {
        let removed = self.inner.take_if(|connection| match host_id {
            None => true,
            Some(id) => connection.host().local_id == id,
        });
        if let Some(connection) = removed {
            self.inner
                .retire(&connection, "disconnected by request");
        }
    }

    /// 等待直到存在活动连接
    pub async fn await_connection(&self) -> Result<Arc<Connection>, SshError> {
        let mut rx = self.inner.active.subscribe();
        let wait = async {
            let slot = rx
                .wait_for(|slot| slot.is_some())
                .await
                .map_err(|_| SshError::Cancelled)?;
            slot.clone().ok_or(SshError::Cancelled)
        };
        tokio::select! {
            connection = wait => connection,
            _ = self.inner.shutdown.cancelled() => Err(SshError::Cancelled),
        }
    }

    /// 当前活动连接（可观察）
    pub fn active_connection(&self) -> watch::Receiver<Option<Arc<Connection>>> {
        self.inner.active.subscribe()
    }

    pub fn current(&self) -> Option<Arc<Connection>> {
        self.inner.current()
    }

    /// 订阅连接事件
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// 触发关闭（等同于取消 shutdown token）
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl ManagerInner {
    fn current(&self) -> Option<Arc<Connection>> {
        self.active.borrow().clone()
    }

    /// 原子地换入新连接并关闭被替换的连接
    fn install(self: &Arc<Self>, connection: Arc<Connection>) -> Result<Arc<Connection>, SshError> {
        if self.shutdown.is_cancelled() {
            connection.close();
            return Err(SshError::Cancelled);
        }

        let previous = self.active.send_replace(Some(connection.clone()));
        self.watch_link(&connection);
        self.publish(
            connection.id(),
            ConnectionEventKind::Connected {
                host: connection.host().display_name().to_string(),
            },
        );
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &connection) {
                self.retire(&previous, "replaced");
            }
        }

        // teardown 可能在替换前后发生
        if self.shutdown.is_cancelled() {
            if let Some(orphan) = self.take_if(|active| Arc::ptr_eq(active, &connection)) {
                self.retire(&orphan, "shutdown");
            }
            return Err(SshError::Cancelled);
        }
        Ok(connection)
    }

    /// 若活动连接满足条件则将其移出
    fn take_if(&self, predicate: impl Fn(&Arc<Connection>) -> bool) -> Option<Arc<Connection>> {
        let mut removed = None;
        self.active.send_if_modified(|slot| match slot {
            Some(connection) if predicate(connection) => {
                removed = slot.take();
                true
            }
            _ => false,
        });
        removed
    }

    fn retire(&self, connection: &Arc<Connection>, reason: &str) {
        connection.close();
        self.publish(
            connection.id(),
            ConnectionEventKind::Disconnected {
                reason: reason.to_string(),
            },
        );
    }

    fn teardown(&self) {
        info!("[SSH Manager] Shutting down");
        if let Some(connection) = self.take_if(|_| true) {
            self.retire(&connection, "shutdown");
        }
    }

    fn publish(&self, connection_id: &str, kind: ConnectionEventKind) {
        let event = ConnectionEvent::new(connection_id, kind);
        debug!("[SSH Manager] {}", event.describe());
        let _ = self.events.send(event);
    }

    /// 把连接的传输状态变化转为事件
    fn watch_link(self: &Arc<Self>, connection: &Arc<Connection>) {
        let mut link = connection.subscribe();
        let connection: Weak<Connection> = Arc::downgrade(connection);
        let manager = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = link.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
                let connected = *link.borrow_and_update();
                let (Some(connection), Some(manager)) = (connection.upgrade(), manager.upgrade())
                else {
                    break;
                };
                if connection.is_closed() {
                    break;
                }
                let kind = if connected {
                    ConnectionEventKind::Resurrected {
                        attempt: connection.reconnect_count(),
                    }
                } else {
                    ConnectionEventKind::LinkLost
                };
                manager.publish(connection.id(), kind);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ssh::testing::{eventually, FakeConnector};

    fn host(name: &str, id: i64) -> RemoteHost {
        let mut host = RemoteHost::new(name, 22, "user", "secret");
        host.local_id = id;
        host
    }

    fn manager(fake: &Arc<FakeConnector>) -> (ConnectionManager, CancellationToken) {
        let token = CancellationToken::new();
        let manager = ConnectionManager::new(fake.clone(), ConnectionSettings::default(), token.clone());
        (manager, token)
    }

    #[tokio::test]
    async fn test_connect_same_host_reuses_connection() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, _token) = manager(&fake);

        let first = manager.connect(host("a", 1)).await.unwrap();
        let second = manager.connect(host("a", 1)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_closes_previous() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, _token) = manager(&fake);
        let mut active = manager.active_connection();

        let a = manager.connect(host("a", 1)).await.unwrap();
        let b = manager.connect(host("b", 2)).await.unwrap();

        assert!(a.is_closed());
        assert!(!b.is_closed());
        let current = active.borrow_and_update().clone().unwrap();
        assert!(Arc::ptr_eq(&current, &b));
        eventually(|| fake.disconnect_count() == 1).await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_reported() {
        let fake = Arc::new(FakeConnector::new());
        fake.fail_auth(true);
        let (manager, _token) = manager(&fake);
        let mut events = manager.events();

        let err = manager.connect(host("a", 1)).await.err().unwrap();
        assert!(matches!(err, SshError::Auth(_)));
        assert!(manager.current().is_none());
        let event = events.recv().await.unwrap();
        assert!(matches!(event.kind, ConnectionEventKind::Failed { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_by_host_id() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, _token) = manager(&fake);
        let a = manager.connect(host("a", 1)).await.unwrap();

        manager.disconnect(Some(7));
        assert!(manager.current().is_some());

        manager.disconnect(Some(1));
        assert!(manager.current().is_none());
        assert!(a.is_closed());

        manager.disconnect(None);
        eventually(|| fake.disconnect_count() == 1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_settle_to_single_connection() {
        let fake = Arc::new(FakeConnector::new());
        fake.set_connect_delay(Some(Duration::from_millis(5)));
        let (manager, _token) = manager(&fake);

        let mut tasks = Vec::new();
        for i in 0..24 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                match i % 3 {
                    0 => {
                        let _ = manager.connect(host("a", 1)).await;
                    }
                    1 => {
                        let _ = manager.connect(host("b", 2)).await;
                    }
                    _ => manager.disconnect(None),
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let active = manager.current();
        if let Some(active) = &active {
            assert!(!active.is_closed());
        }
        let expected = fake.connect_count() - usize::from(active.is_some());
        eventually(|| fake.disconnect_count() == expected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fake.disconnect_count(), expected);
    }

    #[tokio::test]
    async fn test_await_connection() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, _token) = manager(&fake);

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.await_connection().await })
        };
        let connection = manager.connect(host("a", 1)).await.unwrap();
        let awaited = waiter.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&connection, &awaited));
    }

    #[tokio::test]
    async fn test_shutdown_closes_active_connection() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, token) = manager(&fake);
        let connection = manager.connect(host("a", 1)).await.unwrap();

        token.cancel();
        eventually(|| connection.is_closed()).await;
        assert!(manager.current().is_none());
        assert!(matches!(
            manager.connect(host("b", 2)).await,
            Err(SshError::Cancelled)
        ));
        assert!(matches!(
            manager.await_connection().await,
            Err(SshError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_link_events() {
        let fake = Arc::new(FakeConnector::new());
        let (manager, _token) = manager(&fake);
        let connection = manager.connect(host("a", 1)).await.unwrap();
        let mut events = manager.events();

        fake.drop_link();
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ConnectionEventKind::LinkLost);

        assert_eq!(connection.execute("echo back").await.unwrap(), "back");
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ConnectionEventKind::Resurrected { attempt: 1 });
    }
}
