//! 控制台配置（console-config.json）。
//!
//! 约定：
//! - 所有字段均有默认值（`#[serde(default)]`），配置文件可只写需要覆盖的项
//! - 配置文件不存在时使用默认配置
//! - 命令行参数优先于配置文件（由上层合并）
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::ApiRoutes;
use crate::permission::PermissionFallback;

/// 控制台配置。
///
/// 字段说明：
/// - `base_url`：后端根地址
/// - `admin_route_prefix`：管理端接口前缀（`/api/{prefix}/...`）
/// - `socket_url`：实时通道地址；为空时由 `base_url` 推导
/// - `reconnect_attempts` / `reconnect_delay_ms`：实时通道重连次数与固定间隔
/// - `force_logout_redirect_delay_ms`：强制下线后跳转登录页的延迟
/// - `sign_in_route`：登录页路由
/// - `permission_fallback`：权限拉取失败时的兜底策略
/// - `request_timeout_secs`：HTTP 请求超时
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub admin_route_prefix: String,
    pub socket_url: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub force_logout_redirect_delay_ms: u64,
    pub sign_in_route: String,
    pub permission_fallback: PermissionFallback,
    pub request_timeout_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            admin_route_prefix: "admin".to_string(),
            socket_url: None,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            force_logout_redirect_delay_ms: 1500,
            sign_in_route: "/signin".to_string(),
            permission_fallback: PermissionFallback::default(),
            request_timeout_secs: 30,
        }
    }
}

impl ConsoleConfig {
    /// 读取配置文件；文件不存在时返回默认配置。
    ///
    /// 异常处理：
    /// - 文件存在但读取/解析失败时返回错误
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("读取配置失败: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("解析配置 JSON 失败: {}", path.display()))
    }

    /// 管理端路由拼接器。
    pub fn routes(&self) -> ApiRoutes {
        ApiRoutes::new(&self.base_url, &self.admin_route_prefix)
    }

    /// 实时通道地址。
    ///
    /// 推导规则（未显式配置时）：
    /// - `http://` → `ws://`，`https://` → `wss://`
    /// - 路径固定为 `/socket.io/?EIO=4&transport=websocket`
    pub fn socket_url(&self) -> String {
        if let Some(url) = self.socket_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/socket.io/?EIO=4&transport=websocket")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn force_logout_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.force_logout_redirect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
