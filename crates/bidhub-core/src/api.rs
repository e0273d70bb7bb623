//! 后端 REST 接口约定：统一响应信封、路由拼接与请求体模型。
//!
//! 约定：
//! - 所有接口均为 `POST {base_url}/api/{admin_route_prefix}/{resource}/{action}`
//! - 响应统一为 `{status, message?, data}`，`status == 200` 视为成功
//! - 表单类请求在发出前先做本地校验（[`ValidationError`]），校验失败不发请求
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::negotiation::NegotiationRecord;
use crate::permission::PermissionSnapshot;
use crate::session::AdminUser;

/// 后端约定的成功状态码。
pub const STATUS_OK: u16 = 200;

/// 统一响应信封。
///
/// 说明：
/// - `message` 可缺省；失败时用于向管理员展示原因
/// - `data` 在失败响应中通常为 `null`，因此建模为 `Option<T>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// 是否为成功响应（`status == 200`）。
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// 失败原因文本；后端未给出 `message` 时返回固定的兜底文案。
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().filter(|m| !m.trim().is_empty()).unwrap_or("unknown error")
    }
}

/// 管理端路由拼接器。
///
/// 示例：
/// - `base_url = "https://api.example.com/"`，`prefix = "admin"`
/// - `url("auth", "login")` => `https://api.example.com/api/admin/auth/login`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoutes {
    base_url: String,
    prefix: String,
}

impl ApiRoutes {
    /// 创建路由拼接器；首尾多余的 `/` 会被去掉。
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { base_url, prefix }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拼接 `{resource}/{action}` 的完整地址。
    pub fn url(&self, resource: &str, action: &str) -> String {
        let resource = resource.trim_matches('/');
        let action = action.trim_matches('/');
        if self.prefix.is_empty() {
            format!("{}/api/{}/{}", self.base_url, resource, action)
        } else {
            format!("{}/api/{}/{}/{}", self.base_url, self.prefix, resource, action)
        }
    }
}

/// 表单本地校验错误（第三类错误：请求未发出）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("字段 `{field}` 校验失败: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ValidationError {
    fn required(field: &'static str) -> Self {
        Self { field, reason: "不能为空" }
    }
}

/// 登录请求体（`auth/login`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    /// 邮箱与密码均不能为空白。
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() {
            return Err(ValidationError::required("email"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::required("password"));
        }
        Ok(())
    }
}

/// 登录响应中的 `data` 部分。
///
/// 说明：
/// - `permissions` 可能随登录一并下发；缺省时由权限缓存按需拉取
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,
    pub user: AdminUser,
    #[serde(default)]
    pub permissions: Option<PermissionSnapshot>,
}

/// 议价列表查询（`negotiation/list`），支持按竞拍过滤与分页。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_id: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl Default for NegotiationListRequest {
    fn default() -> Self {
        Self { bid_id: None, page: 1, limit: 20 }
    }
}

/// 议价列表分页结果。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationPage {
    #[serde(default)]
    pub items: Vec<NegotiationRecord>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
}

/// 还价请求体（`negotiation/counter`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterOfferRequest {
    pub bid_id: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CounterOfferRequest {
    /// 竞拍 ID 不能为空，价格必须为正的有限数。
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bid_id.trim().is_empty() {
            return Err(ValidationError::required("bidId"));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError { field: "price", reason: "必须大于 0" });
        }
        if self.quantity == Some(0) {
            return Err(ValidationError { field: "quantity", reason: "必须大于 0" });
        }
        Ok(())
    }
}

/// 接受报价请求体（`negotiation/accept`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOfferRequest {
    pub negotiation_id: String,
}

impl AcceptOfferRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.negotiation_id.trim().is_empty() {
            return Err(ValidationError::required("negotiationId"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_join_prefix_and_trim_slashes() {
        let routes = ApiRoutes::new("https://api.example.com/", "/admin/");
        assert_eq!(routes.url("auth", "login"), "https://api.example.com/api/admin/auth/login");
        assert_eq!(
            routes.url("/negotiation/", "list"),
            "https://api.example.com/api/admin/negotiation/list"
        );

        let bare = ApiRoutes::new("http://localhost:4000", "");
        assert_eq!(bare.url("auth", "login"), "http://localhost:4000/api/auth/login");
    }

    #[test]
    fn envelope_without_data_or_message() {
        let env: Envelope<serde_json::Value> = serde_json::from_str(r#"{"status":401}"#).unwrap();
        assert!(!env.is_success());
        assert!(env.data.is_none());
        assert_eq!(env.message_or_default(), "unknown error");

        let env: Envelope<u32> =
            serde_json::from_str(r#"{"status":200,"message":"ok","data":7}"#).unwrap();
        assert!(env.is_success());
        assert_eq!(env.data, Some(7));
    }

    #[test]
    fn envelope_payload_needs_no_default() {
        #[derive(Debug, Deserialize)]
        struct Receipt {
            id: String,
        }

        let env: Envelope<Receipt> =
            serde_json::from_str(r#"{"status":409,"message":"Offer already accepted"}"#).unwrap();
        assert!(env.data.is_none());
        assert_eq!(env.message_or_default(), "Offer already accepted");

        let env: Envelope<Receipt> =
            serde_json::from_str(r#"{"status":200,"data":{"id":"n-1"}}"#).unwrap();
        assert_eq!(env.data.map(|r| r.id).as_deref(), Some("n-1"));
    }

    #[test]
    fn login_validation_rejects_blank_fields() {
        let req = LoginRequest { email: "  ".into(), password: "x".into() };
        assert_eq!(req.validate().unwrap_err().field, "email");
        let req = LoginRequest { email: "a@b.c".into(), password: String::new() };
        assert_eq!(req.validate().unwrap_err().field, "password");
        let req = LoginRequest { email: "a@b.c".into(), password: "pw".into() };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn counter_offer_validation() {
        let mut req =
            CounterOfferRequest { bid_id: "b1".into(), price: 0.0, quantity: None, message: None };
        assert_eq!(req.validate().unwrap_err().field, "price");
        req.price = f64::NAN;
        assert_eq!(req.validate().unwrap_err().field, "price");
        req.price = 12.5;
        assert!(req.validate().is_ok());
        req.quantity = Some(0);
        assert_eq!(req.validate().unwrap_err().field, "quantity");
        req.quantity = Some(3);
        req.bid_id = String::new();
        assert_eq!(req.validate().unwrap_err().field, "bidId");
    }

    #[test]
    fn counter_offer_serializes_camel_case_without_empty_optionals() {
        let req =
            CounterOfferRequest { bid_id: "b1".into(), price: 10.0, quantity: None, message: None };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, serde_json::json!({"bidId": "b1", "price": 10.0}));
    }
}
