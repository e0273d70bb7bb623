//! BidHub 竞拍管理后台客户端 IO 适配层。
//!
//! 功能：
//! - 后端网关客户端（reqwest）：统一 `POST` + JSON 信封
//! - 权限缓存：加载/刷新权限快照，拉取失败时按配置兜底
//! - 实时事件中继（tokio-tungstenite）：socket.io 协议、重连、强制下线
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

pub mod gateway;
pub mod permissions;
pub mod relay;
