//! 权限快照模型与权限判定。
//!
//! 快照结构（JSON）：
//! - `{role, modules: [{key, path, permissions: {read, write, verifyApprove}, subItems?}]}`
//!
//! 判定规则：
//! - 角色为 `superadmin` 时任何判定都直接返回 `true`，不查模块
//! - 其余角色按模块路径精确匹配（含嵌套子菜单），未命中一律返回 `false`
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 拥有全部权限的特殊角色名。
pub const SUPERADMIN_ROLE: &str = "superadmin";

/// 权限种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    /// 查看。
    Read,
    /// 新增/编辑。
    Write,
    /// 审核/审批。
    VerifyApprove,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::VerifyApprove => "verifyApprove",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionKind {
    type Err = String;

    /// 兼容 `verifyApprove` / `verify_approve` / `verify-approve` 三种写法。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "read" => Ok(PermissionKind::Read),
            "write" => Ok(PermissionKind::Write),
            "verifyapprove" => Ok(PermissionKind::VerifyApprove),
            other => Err(format!("未知权限种类: {other}")),
        }
    }
}

/// 单个模块的权限标志；缺省字段视为 `false`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionFlags {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub verify_approve: bool,
}

impl PermissionFlags {
    /// 全部放行。
    pub fn all() -> Self {
        Self { read: true, write: true, verify_approve: true }
    }

    pub fn get(&self, kind: PermissionKind) -> bool {
        match kind {
            PermissionKind::Read => self.read,
            PermissionKind::Write => self.write,
            PermissionKind::VerifyApprove => self.verify_approve,
        }
    }
}

/// 模块（菜单项）权限，可嵌套子菜单。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePermission {
    #[serde(default)]
    pub key: String,
    pub path: String,
    #[serde(default)]
    pub permissions: PermissionFlags,
    #[serde(default)]
    pub sub_items: Vec<ModulePermission>,
}

impl ModulePermission {
    /// 访问标志：能否进入该模块页面，等同于 `read`。
    pub fn has_access(&self) -> bool {
        self.permissions.read
    }

    fn find(&self, path: &str) -> Option<&ModulePermission> {
        if self.path == path {
            return Some(self);
        }
        self.sub_items.iter().find_map(|m| m.find(path))
    }
}

/// 当前管理员的权限快照（每个会话一份）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub role: String,
    #[serde(default)]
    pub modules: Vec<ModulePermission>,
}

impl PermissionSnapshot {
    /// 超级管理员快照（不含模块，判定时直接放行）。
    pub fn superadmin() -> Self {
        Self { role: SUPERADMIN_ROLE.to_string(), modules: Vec::new() }
    }

    /// 空快照：除 superadmin 外任何判定都为 `false`。
    pub fn empty(role: impl Into<String>) -> Self {
        Self { role: role.into(), modules: Vec::new() }
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == SUPERADMIN_ROLE
    }

    /// 按路径精确查找模块（深度优先，先顶层后子菜单）。
    pub fn find_module(&self, path: &str) -> Option<&ModulePermission> {
        self.modules.iter().find_map(|m| m.find(path))
    }

    /// 能否访问某模块。
    pub fn has_access(&self, path: &str) -> bool {
        if self.is_superadmin() {
            return true;
        }
        self.find_module(path).map(ModulePermission::has_access).unwrap_or(false)
    }

    /// 是否拥有某模块的某种权限。
    pub fn has_permission(&self, path: &str, kind: PermissionKind) -> bool {
        if self.is_superadmin() {
            return true;
        }
        self.find_module(path).map(|m| m.permissions.get(kind)).unwrap_or(false)
    }
}

/// 权限拉取失败时的兜底策略。
///
/// 说明：
/// - `grant_all`：按超级管理员处理（旧版控制台行为，失败即放行）
/// - `deny_all`：按空权限处理（默认）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionFallback {
    GrantAll,
    #[default]
    DenyAll,
}

impl PermissionFallback {
    /// 生成兜底快照。
    ///
    /// 参数：
    /// - `role_hint`：本地已知的角色名（拒绝策略下保留，用于展示）
    pub fn snapshot(&self, role_hint: Option<&str>) -> PermissionSnapshot {
        match self {
            PermissionFallback::GrantAll => PermissionSnapshot::superadmin(),
            PermissionFallback::DenyAll => {
                // 拒绝策略下不能沿用 superadmin 角色名，否则等同放行。
                let role = role_hint.filter(|r| *r != SUPERADMIN_ROLE).unwrap_or_default();
                PermissionSnapshot::empty(role)
            }
        }
    }
}
