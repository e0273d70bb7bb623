//! 后端网关客户端（HTTP）。
//!
//! 约定：
//! - 每个操作都是一次 `POST {base_url}/api/{prefix}/{resource}/{action}`，请求体为 JSON
//! - 存在令牌时附加 `Authorization: Bearer <token>`；令牌每次请求时从会话上下文读取
//! - 不做自动重试；失败按三类返回（网络、服务端、本地校验）
//!
//! 安全注意：
//! - 令牌不写日志
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::sync::Arc;

use bidhub_core::api::{
    AcceptOfferRequest, ApiRoutes, CounterOfferRequest, Envelope, LoginData, LoginRequest,
    NegotiationListRequest, NegotiationPage, ValidationError,
};
use bidhub_core::config::ConsoleConfig;
use bidhub_core::negotiation::NegotiationRecord;
use bidhub_core::permission::PermissionSnapshot;
use bidhub_core::session::SessionContext;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// 网关调用错误。
#[derive(Debug, Error)]
pub enum ApiError {
    /// 未收到响应（连接失败、超时等）。
    #[error("网络请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    /// 服务端返回失败（信封 `status != 200` 或 HTTP 非 2xx）。
    #[error("服务端返回失败 (status={status}): {message}")]
    Server { status: u16, message: String },
    /// 本地表单校验失败，请求未发出。
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("响应 JSON 解析失败: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("成功响应缺少 data 字段")]
    MissingData,
}

impl ApiError {
    /// 是否为服务端明确拒绝（便于上层区分“要不要提示用户检查输入”）。
    pub fn is_server(&self) -> bool {
        matches!(self, ApiError::Server { .. })
    }
}

/// 网关客户端。
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    routes: ApiRoutes,
    session: Option<Arc<SessionContext>>,
}

impl GatewayClient {
    /// 按配置创建客户端（超时、路由前缀）。
    pub fn new(config: &ConsoleConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("bidhub-console/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, routes: config.routes(), session: None })
    }

    /// 绑定会话上下文，之后的请求自动附带令牌。
    pub fn with_session(mut self, session: Arc<SessionContext>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    fn bearer_token(&self) -> Option<String> {
        let session = self.session.as_ref()?;
        match session.token() {
            Ok(token) => token,
            Err(e) => {
                warn!("读取令牌失败，按未登录发送请求: {e}");
                None
            }
        }
    }

    /// 发送请求并返回完整信封。
    ///
    /// 异常处理：
    /// - 无响应：`Transport`
    /// - HTTP 非 2xx 且响应体不是信封：`Server`（status 为 HTTP 状态码）
    /// - 信封 `status != 200`：`Server`（status 为信封状态码）
    /// - 信封成功但 HTTP 非 2xx：`Server`（status 为 HTTP 状态码）
    pub async fn post<B, T>(
        &self,
        resource: &str,
        action: &str,
        body: &B,
    ) -> Result<Envelope<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.routes.url(resource, action);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = self.bearer_token() {
            request = request.bearer_auth(token);
        }
        debug!("POST {url}");

        let response = request.send().await?;
        let http_status = response.status();
        let text = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) if http_status.is_success() => return Err(ApiError::Decode(e)),
            Err(_) => {
                return Err(ApiError::Server {
                    status: http_status.as_u16(),
                    message: if text.trim().is_empty() {
                        http_status.canonical_reason().unwrap_or("unknown error").to_string()
                    } else {
                        text
                    },
                })
            }
        };
        if !envelope.is_success() {
            let message = envelope.message_or_default().to_string();
            debug!("POST {url} 失败: status={} message={message}", envelope.status);
            return Err(ApiError::Server { status: envelope.status, message });
        }
        if !http_status.is_success() {
            let message = envelope.message_or_default().to_string();
            debug!("POST {url} 失败: http={http_status} message={message}");
            return Err(ApiError::Server { status: http_status.as_u16(), message });
        }
        Ok(envelope)
    }

    /// 发送请求并取出 `data`。
    pub async fn call<B, T>(&self, resource: &str, action: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post::<B, T>(resource, action, body).await?.data.ok_or(ApiError::MissingData)
    }

    /// 登录（`auth/login`）。
    pub async fn login(&self, req: &LoginRequest) -> Result<LoginData, ApiError> {
        req.validate()?;
        self.call("auth", "login", req).await
    }

    /// 退出登录（`auth/logout`），忽略 `data`。
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.post::<_, Value>("auth", "logout", &serde_json::json!({})).await?;
        Ok(())
    }

    /// 拉取当前管理员的权限快照（`permission/my-permissions`）。
    pub async fn my_permissions(&self) -> Result<PermissionSnapshot, ApiError> {
        self.call("permission", "my-permissions", &serde_json::json!({})).await
    }

    /// 议价列表（`negotiation/list`）。
    pub async fn list_negotiations(
        &self,
        req: &NegotiationListRequest,
    ) -> Result<NegotiationPage, ApiError> {
        self.call("negotiation", "list", req).await
    }

    /// 还价（`negotiation/counter`）。
    pub async fn counter_offer(
        &self,
        req: &CounterOfferRequest,
    ) -> Result<NegotiationRecord, ApiError> {
        req.validate()?;
        self.call("negotiation", "counter", req).await
    }

    /// 接受报价（`negotiation/accept`）；是否真正成交以服务端为准。
    pub async fn accept_offer(
        &self,
        req: &AcceptOfferRequest,
    ) -> Result<NegotiationRecord, ApiError> {
        req.validate()?;
        self.call("negotiation", "accept", req).await
    }
}
