//! 权限缓存：在会话内回答“当前管理员能否对模块 X 做 Y”，不必每次请求后端。
//!
//! 加载顺序：
//! 1) 会话上下文中已保存的快照（进程内缓存 → 本地存储）
//! 2) 未命中时向后端拉取，并落盘
//! 3) 拉取失败时按 [`PermissionFallback`] 生成兜底快照（只进内存，不落盘）
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bidhub_core::permission::{PermissionFallback, PermissionKind, PermissionSnapshot};
use bidhub_core::session::SessionContext;
use tracing::{info, warn};

use crate::gateway::GatewayClient;

/// 快照来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// 本地已保存。
    Stored,
    /// 刚从后端拉取。
    Fetched,
    /// 拉取失败后的兜底快照。
    Fallback,
}

/// 一次加载的结果。
#[derive(Debug, Clone)]
pub struct LoadedPermissions {
    pub snapshot: PermissionSnapshot,
    pub origin: SnapshotOrigin,
}

pub struct PermissionCache {
    session: Arc<SessionContext>,
    gateway: GatewayClient,
    fallback: PermissionFallback,
    /// 当前缓存是否为兜底快照；是则下次 `load` 重新拉取。
    degraded: AtomicBool,
}

impl PermissionCache {
    pub fn new(
        session: Arc<SessionContext>,
        gateway: GatewayClient,
        fallback: PermissionFallback,
    ) -> Self {
        Self { session, gateway, fallback, degraded: AtomicBool::new(false) }
    }

    /// 加载快照：优先使用已保存的快照，未命中再拉取。
    ///
    /// 异常处理：
    /// - 本地存储读失败按未命中处理
    /// - 落盘失败只告警，仍返回拉取到的快照
    /// - 拉取失败不返回错误，按兜底策略处理
    pub async fn load(&self) -> LoadedPermissions {
        if self.degraded.load(Ordering::SeqCst) {
            return self.fetch().await;
        }
        match self.session.stored_permissions() {
            Ok(Some(snapshot)) => {
                return LoadedPermissions { snapshot, origin: SnapshotOrigin::Stored };
            }
            Ok(None) => {}
            Err(e) => warn!("读取本地权限快照失败，改为重新拉取: {e}"),
        }
        self.fetch().await
    }

    /// 收到权限变更信号：作废后重新拉取并整体覆盖。
    pub async fn refresh(&self) -> LoadedPermissions {
        if let Err(e) = self.session.invalidate_permissions() {
            warn!("作废本地权限快照失败: {e}");
        }
        self.fetch().await
    }

    async fn fetch(&self) -> LoadedPermissions {
        match self.gateway.my_permissions().await {
            Ok(snapshot) => {
                self.degraded.store(false, Ordering::SeqCst);
                info!("权限快照已更新: role={} modules={}", snapshot.role, snapshot.modules.len());
                if let Err(e) = self.session.replace_permissions(snapshot.clone()) {
                    warn!("权限快照落盘失败: {e}");
                    self.session.cache_only(snapshot.clone());
                }
                LoadedPermissions { snapshot, origin: SnapshotOrigin::Fetched }
            }
            Err(e) => {
                let role_hint = self.session.role().ok().flatten();
                let snapshot = self.fallback.snapshot(role_hint.as_deref());
                match self.fallback {
                    PermissionFallback::GrantAll => {
                        warn!("权限拉取失败，按 grant_all 策略临时放行全部权限: {e}")
                    }
                    PermissionFallback::DenyAll => {
                        warn!("权限拉取失败，按 deny_all 策略拒绝全部权限: {e}")
                    }
                }
                self.session.cache_only(snapshot.clone());
                self.degraded.store(true, Ordering::SeqCst);
                LoadedPermissions { snapshot, origin: SnapshotOrigin::Fallback }
            }
        }
    }

    /// 当前快照（未加载时为 `None`）。
    pub fn snapshot(&self) -> Option<PermissionSnapshot> {
        self.session.stored_permissions().ok().flatten()
    }

    /// 能否访问模块；未加载快照时一律 `false`。
    pub fn has_access(&self, path: &str) -> bool {
        self.snapshot().map(|s| s.has_access(path)).unwrap_or(false)
    }

    /// 是否拥有模块的某种权限；未加载快照时一律 `false`。
    pub fn has_permission(&self, path: &str, kind: PermissionKind) -> bool {
        self.snapshot().map(|s| s.has_permission(path, kind)).unwrap_or(false)
    }
}
