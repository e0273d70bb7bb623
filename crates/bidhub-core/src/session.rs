//! 会话上下文与本地键值存储。
//!
//! 存储约定（对应浏览器 localStorage 的键）：
//! - `token`：认证令牌
//! - `userId` / `user`：当前管理员 ID 与完整用户对象
//! - `permissions`：权限快照
//! - `role`：角色名
//!
//! 生命周期：
//! - 登录时创建（[`SessionContext::begin`]）
//! - 收到权限变更信号时整体替换快照（[`SessionContext::replace_permissions`]）
//! - 退出登录或被强制下线时销毁（[`SessionContext::end`]）
//!
//! 并发语义：
//! - 后写覆盖先写，不做版本控制
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::permission::PermissionSnapshot;

/// 存储键名。
pub mod keys {
    pub const TOKEN: &str = "token";
    pub const USER_ID: &str = "userId";
    pub const USER: &str = "user";
    pub const PERMISSIONS: &str = "permissions";
    pub const ROLE: &str = "role";

    /// 会话结束时需要清除的全部键。
    pub const SESSION: [&str; 5] = [TOKEN, USER_ID, USER, PERMISSIONS, ROLE];
}

/// 存储错误。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("读写存储文件失败: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("存储内容 JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 键值存储（值为任意 JSON）。
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 内存存储（测试与一次性命令使用）。
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// 文件存储：整个存储落盘为一个 JSON 对象（如 `local-storage.json`）。
///
/// 说明：
/// - 每次读写都重新读取文件，以便多个进程共享同一份会话
/// - 文件不存在视为空存储
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), guard: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(StoreError::Io { path: self.path.clone(), source }),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, bytes)
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _g = lock(&self.guard);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _g = lock(&self.guard);
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _g = lock(&self.guard);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// 读取并反序列化某个键；`null` 视为不存在。
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
    }
}

/// 序列化后写入某个键。
pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?)
}

/// 当前登录的管理员。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// 会话上下文。
///
/// 说明：
/// - 令牌与用户信息每次都从存储读取（与其他进程/窗口共享）
/// - 权限快照额外在进程内缓存一份，避免每次判定都读盘
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    permissions: RwLock<Option<PermissionSnapshot>>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, permissions: RwLock::new(None) }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// 登录成功：写入令牌、用户与（可选的）权限快照。
    pub fn begin(
        &self,
        token: &str,
        user: &AdminUser,
        permissions: Option<PermissionSnapshot>,
    ) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        write_json(store, keys::TOKEN, &token)?;
        write_json(store, keys::USER_ID, &user.id)?;
        write_json(store, keys::USER, user)?;
        match permissions {
            Some(snapshot) => self.replace_permissions(snapshot)?,
            None => {
                if let Some(role) = &user.role {
                    write_json(store, keys::ROLE, role)?;
                }
                self.invalidate_permissions()?;
            }
        }
        debug!("会话已建立: user_id={}", user.id);
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>, StoreError> {
        Ok(read_json::<String>(self.store.as_ref(), keys::TOKEN)?.filter(|t| !t.is_empty()))
    }

    pub fn user_id(&self) -> Result<Option<String>, StoreError> {
        read_json(self.store.as_ref(), keys::USER_ID)
    }

    pub fn user(&self) -> Result<Option<AdminUser>, StoreError> {
        read_json(self.store.as_ref(), keys::USER)
    }

    pub fn role(&self) -> Result<Option<String>, StoreError> {
        read_json(self.store.as_ref(), keys::ROLE)
    }

    /// 进程内缓存的快照（不读存储）。
    pub fn cached_permissions(&self) -> Option<PermissionSnapshot> {
        self.permissions.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 已保存的快照：先查进程内缓存，再查存储；存储命中时回填缓存。
    pub fn stored_permissions(&self) -> Result<Option<PermissionSnapshot>, StoreError> {
        if let Some(snapshot) = self.cached_permissions() {
            return Ok(Some(snapshot));
        }
        let stored: Option<PermissionSnapshot> = read_json(self.store.as_ref(), keys::PERMISSIONS)?;
        if let Some(snapshot) = &stored {
            self.cache_only(snapshot.clone());
        }
        Ok(stored)
    }

    /// 整体替换快照（缓存 + 存储 + 角色键），不做合并。
    pub fn replace_permissions(&self, snapshot: PermissionSnapshot) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        write_json(store, keys::PERMISSIONS, &snapshot)?;
        write_json(store, keys::ROLE, &snapshot.role)?;
        self.cache_only(snapshot);
        Ok(())
    }

    /// 只写进程内缓存，不落盘（用于拉取失败时的兜底快照）。
    pub fn cache_only(&self, snapshot: PermissionSnapshot) {
        *self.permissions.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot);
    }

    /// 作废快照：下次判定前需要重新加载。
    pub fn invalidate_permissions(&self) -> Result<(), StoreError> {
        *self.permissions.write().unwrap_or_else(|p| p.into_inner()) = None;
        self.store.remove(keys::PERMISSIONS)
    }

    /// 销毁会话：清除全部会话键与进程内缓存。
    pub fn end(&self) -> Result<(), StoreError> {
        clear_session_keys(self.store.as_ref())?;
        *self.permissions.write().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

/// 清除全部会话键（强制下线时由实时通道直接调用）。
pub fn clear_session_keys(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    for key in keys::SESSION {
        store.remove(key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionKind;

    fn admin() -> AdminUser {
        AdminUser {
            id: "u1".into(),
            name: "Ops".into(),
            email: "ops@example.com".into(),
            role: Some("admin".into()),
        }
    }

    #[test]
    fn begin_then_end_clears_every_key() {
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext::new(store.clone());
        ctx.begin("tok", &admin(), Some(PermissionSnapshot::empty("admin"))).unwrap();
        assert_eq!(ctx.token().unwrap().as_deref(), Some("tok"));
        assert_eq!(ctx.user_id().unwrap().as_deref(), Some("u1"));
        assert_eq!(ctx.role().unwrap().as_deref(), Some("admin"));
        assert!(ctx.stored_permissions().unwrap().is_some());

        ctx.end().unwrap();
        assert!(store.is_empty());
        assert!(ctx.cached_permissions().is_none());
        assert!(ctx.token().unwrap().is_none());
    }

    #[test]
    fn begin_without_permissions_keeps_role_from_user() {
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext::new(store);
        ctx.begin("tok", &admin(), None).unwrap();
        assert_eq!(ctx.role().unwrap().as_deref(), Some("admin"));
        assert!(ctx.stored_permissions().unwrap().is_none());
    }

    #[test]
    fn replace_overwrites_instead_of_merging() {
        let ctx = SessionContext::new(Arc::new(MemoryStore::new()));
        let first: PermissionSnapshot = serde_json::from_value(serde_json::json!({
            "role": "admin",
            "modules": [{"key": "orders", "path": "/orders", "permissions": {"read": true}}]
        }))
        .unwrap();
        ctx.replace_permissions(first).unwrap();
        ctx.replace_permissions(PermissionSnapshot::empty("viewer")).unwrap();

        let snap = ctx.stored_permissions().unwrap().unwrap();
        assert_eq!(snap.role, "viewer");
        assert!(!snap.has_permission("/orders", PermissionKind::Read));
    }

    #[test]
    fn cache_only_does_not_persist() {
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext::new(store.clone());
        ctx.cache_only(PermissionSnapshot::superadmin());
        assert!(ctx.cached_permissions().is_some());
        assert!(store.get(keys::PERMISSIONS).unwrap().is_none());
    }

    #[test]
    fn file_store_shares_state_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local-storage.json");
        let a = FileStore::new(&path);
        let b = FileStore::new(&path);

        assert!(a.get(keys::TOKEN).unwrap().is_none());
        write_json(&a, keys::TOKEN, &"tok").unwrap();
        assert_eq!(read_json::<String>(&b, keys::TOKEN).unwrap().as_deref(), Some("tok"));

        b.remove(keys::TOKEN).unwrap();
        assert!(a.get(keys::TOKEN).unwrap().is_none());
        // 删除不存在的键不报错
        a.remove("missing").unwrap();
    }

    #[test]
    fn file_store_reports_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local-storage.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(store.get(keys::TOKEN), Err(StoreError::Json(_))));
    }
}
