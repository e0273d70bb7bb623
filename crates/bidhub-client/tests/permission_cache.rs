use std::sync::Arc;

use bidhub_client::gateway::GatewayClient;
use bidhub_client::permissions::{PermissionCache, SnapshotOrigin};
use bidhub_client::relay::{LogNavigator, RealtimeRelay, RelayOptions};
use bidhub_core::config::ConsoleConfig;
use bidhub_core::permission::{PermissionFallback, PermissionKind, PermissionSnapshot};
use bidhub_core::session::{keys, AdminUser, FileStore, KeyValueStore, MemoryStore, SessionContext};

const ORDERS_SNAPSHOT: &str = r#"{"status":200,"data":{"role":"admin","modules":[
    {"key":"orders","path":"/orders","permissions":{"read":true,"write":false}}
]}}"#;

fn session_with(store: Arc<dyn KeyValueStore>) -> Arc<SessionContext> {
    let session = Arc::new(SessionContext::new(store));
    let user = AdminUser {
        id: "u1".into(),
        name: String::new(),
        email: String::new(),
        role: Some("admin".into()),
    };
    session.begin("tok", &user, None).unwrap();
    session
}

fn cache(
    base_url: String,
    session: Arc<SessionContext>,
    fallback: PermissionFallback,
) -> PermissionCache {
    let gateway = GatewayClient::new(&ConsoleConfig { base_url, ..Default::default() })
        .unwrap()
        .with_session(session.clone());
    PermissionCache::new(session, gateway, fallback)
}

#[tokio::test]
async fn fetches_once_then_serves_from_storage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/admin/permission/my-permissions")
        .with_status(200)
        .with_body(ORDERS_SNAPSHOT)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local-storage.json");
    let session = session_with(Arc::new(FileStore::new(&path)));
    let permissions = cache(server.url(), session, PermissionFallback::DenyAll);

    assert!(!permissions.has_access("/orders"));
    let first = permissions.load().await;
    assert_eq!(first.origin, SnapshotOrigin::Fetched);
    let second = permissions.load().await;
    assert_eq!(second.origin, SnapshotOrigin::Stored);

    assert!(permissions.has_permission("/orders", PermissionKind::Read));
    assert!(!permissions.has_permission("/orders", PermissionKind::Write));
    assert!(!permissions.has_permission("/unknown", PermissionKind::Read));

    // 新进程（新的会话上下文）直接读落盘快照，不再请求后端
    let reopened_session = Arc::new(SessionContext::new(Arc::new(FileStore::new(&path))));
    let reopened = cache(server.url(), reopened_session, PermissionFallback::DenyAll);
    assert_eq!(reopened.load().await.origin, SnapshotOrigin::Stored);
    assert!(reopened.has_access("/orders"));

    mock.assert_async().await;
}

#[tokio::test]
async fn refresh_overwrites_the_whole_snapshot() {
    let mut server = mockito::Server::new_async().await;
    let session = session_with(Arc::new(MemoryStore::new()));
    let admins: PermissionSnapshot = serde_json::from_str(
        r#"{"role":"admin","modules":[{"path":"/admins","permissions":{"read":true}}]}"#,
    )
    .unwrap();
    session.replace_permissions(admins).unwrap();
    server
        .mock("POST", "/api/admin/permission/my-permissions")
        .with_status(200)
        .with_body(ORDERS_SNAPSHOT)
        .create_async()
        .await;

    let permissions = cache(server.url(), session.clone(), PermissionFallback::DenyAll);
    assert!(permissions.has_access("/admins"));

    let loaded = permissions.refresh().await;
    assert_eq!(loaded.origin, SnapshotOrigin::Fetched);
    assert!(!permissions.has_access("/admins"));
    assert!(permissions.has_access("/orders"));
    assert_eq!(session.role().unwrap().as_deref(), Some("admin"));
}

#[tokio::test]
async fn fetch_failure_denies_by_default_and_is_not_persisted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/admin/permission/my-permissions")
        .with_status(500)
        .with_body(r#"{"status":500,"message":"db down"}"#)
        .expect(2)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let session = session_with(store.clone());
    let permissions = cache(server.url(), session, PermissionFallback::DenyAll);

    let loaded = permissions.load().await;
    assert_eq!(loaded.origin, SnapshotOrigin::Fallback);
    assert_eq!(loaded.snapshot.role, "admin");
    assert!(!permissions.has_access("/orders"));
    assert!(!permissions.has_permission("/anything", PermissionKind::Read));
    assert!(store.get(keys::PERMISSIONS).unwrap().is_none());

    // 兜底快照不粘滞：下次加载重新请求
    assert_eq!(permissions.load().await.origin, SnapshotOrigin::Fallback);
    mock.assert_async().await;
}

#[tokio::test]
async fn grant_all_fallback_keeps_legacy_behaviour() {
    let session = session_with(Arc::new(MemoryStore::new()));
    let permissions = cache("http://127.0.0.1:1".into(), session, PermissionFallback::GrantAll);

    let loaded = permissions.load().await;
    assert_eq!(loaded.origin, SnapshotOrigin::Fallback);
    assert!(loaded.snapshot.is_superadmin());
    assert!(permissions.has_permission("/anything", PermissionKind::VerifyApprove));
}

#[tokio::test]
async fn forced_logout_revokes_the_cached_snapshot() {
    let session = session_with(Arc::new(MemoryStore::new()));
    let orders: PermissionSnapshot = serde_json::from_str(
        r#"{"role":"admin","modules":[
            {"key":"orders","path":"/orders","permissions":{"read":true,"write":true}}
        ]}"#,
    )
    .unwrap();
    session.replace_permissions(orders).unwrap();

    let permissions =
        cache("http://127.0.0.1:1".into(), session.clone(), PermissionFallback::DenyAll);
    assert!(permissions.has_permission("/orders", PermissionKind::Write));

    let options = RelayOptions::from_config(&ConsoleConfig::default());
    let relay = RealtimeRelay::new(options, session.clone(), Arc::new(LogNavigator));
    relay.handle_inbound("forceLogout", &serde_json::Value::Null);

    assert!(session.token().unwrap().is_none());
    assert!(permissions.snapshot().is_none());
    assert!(!permissions.has_access("/orders"));
    assert!(!permissions.has_permission("/orders", PermissionKind::Write));
}
