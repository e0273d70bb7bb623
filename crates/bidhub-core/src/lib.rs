//! BidHub 竞拍管理后台客户端核心库（与 IO 无关）。
//!
//! 功能：
//! - 定义后端统一响应信封 `{status, message, data}` 与管理端路由拼接规则
//! - 定义权限快照模型与权限判定（superadmin 全放行、按模块路径查找）
//! - 定义议价记录模型、按竞拍分组与可操作性判定
//! - 定义实时通道的事件名与 socket.io/Engine.IO 文本帧编解码
//! - 提供会话上下文与本地键值存储（对应浏览器 localStorage）
//! - 提供请求序号器，避免过期响应覆盖新结果
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

pub mod api;
pub mod config;
pub mod negotiation;
pub mod paths;
pub mod permission;
pub mod realtime;
pub mod sequence;
pub mod session;
