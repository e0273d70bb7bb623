//! 实时通道协议：事件名与 socket.io v4（Engine.IO v4）文本帧编解码。
//!
//! 帧格式（websocket 文本帧）：
//! - `0{json}`：Engine.IO 握手（服务端下发 sid/心跳参数）
//! - `2` / `3`：心跳 ping / pong（客户端收到 `2` 必须回 `3`）
//! - `40{json}`：socket.io 命名空间连接；客户端在 json 中携带认证参数
//! - `41`：命名空间断开
//! - `42["event", data]`：事件
//! - `44{json}`：连接被拒绝（例如令牌无效）
//!
//! 约束：
//! - 仅支持默认命名空间 `/`，不支持二进制附件与 ack
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `joinRoom` 中携带的固定角色标识。
pub const ADMIN_ROLE_TAG: &str = "admin";

/// 服务端推送的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundEvent {
    /// 全员广播消息。
    Message,
    /// 定向到当前用户的消息。
    UserMessage,
    /// 强制下线。
    ForceLogout,
    NegotiationNotification,
    NegotiationBroadcast,
    NegotiationUpdate,
    UserJoinedNegotiation,
    UserLeftNegotiation,
    /// 对方正在输入。
    UserTyping,
    /// 角色/权限变更，需要重新拉取权限快照。
    PermissionsUpdated,
}

impl InboundEvent {
    pub const ALL: [InboundEvent; 10] = [
        InboundEvent::Message,
        InboundEvent::UserMessage,
        InboundEvent::ForceLogout,
        InboundEvent::NegotiationNotification,
        InboundEvent::NegotiationBroadcast,
        InboundEvent::NegotiationUpdate,
        InboundEvent::UserJoinedNegotiation,
        InboundEvent::UserLeftNegotiation,
        InboundEvent::UserTyping,
        InboundEvent::PermissionsUpdated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Message => "message",
            InboundEvent::UserMessage => "userMessage",
            InboundEvent::ForceLogout => "forceLogout",
            InboundEvent::NegotiationNotification => "negotiationNotification",
            InboundEvent::NegotiationBroadcast => "negotiationBroadcast",
            InboundEvent::NegotiationUpdate => "negotiationUpdate",
            InboundEvent::UserJoinedNegotiation => "userJoinedNegotiation",
            InboundEvent::UserLeftNegotiation => "userLeftNegotiation",
            InboundEvent::UserTyping => "userTyping",
            InboundEvent::PermissionsUpdated => "permissionsUpdated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

/// 客户端发出的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundEvent {
    JoinRoom,
    LeaveRoom,
    JoinNegotiation,
    LeaveNegotiation,
    NegotiationTyping,
    MarkNegotiationRead,
    SendToAll,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinRoom => "joinRoom",
            OutboundEvent::LeaveRoom => "leaveRoom",
            OutboundEvent::JoinNegotiation => "joinNegotiation",
            OutboundEvent::LeaveNegotiation => "leaveNegotiation",
            OutboundEvent::NegotiationTyping => "negotiationTyping",
            OutboundEvent::MarkNegotiationRead => "markNegotiationRead",
            OutboundEvent::SendToAll => "sendToAll",
        }
    }
}

/// `joinRoom` / `leaveRoom` 载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub user_id: String,
    pub role: String,
}

impl RoomPayload {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), role: ADMIN_ROLE_TAG.to_string() }
    }
}

/// 议价房间相关载荷（`joinNegotiation` / `leaveNegotiation` / `markNegotiationRead`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRoomPayload {
    pub bid_id: String,
    pub user_id: String,
}

/// `negotiationTyping` 载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub bid_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Engine.IO 握手参数（`0{...}`）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// 帧解析错误。
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("空帧")]
    Empty,
    #[error("不支持的帧类型: {0}")]
    Unsupported(String),
    #[error("帧 JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("事件帧格式不正确")]
    BadEvent,
}

/// 文本帧。
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    /// 命名空间连接；客户端发出时携带认证参数，服务端回包携带 sid。
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
    Noop,
}

impl Packet {
    /// 构造事件帧。
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Packet::Event { name: name.into(), data }
    }

    /// 编码为文本帧。
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(h) => format!("0{}", serde_json::to_string(h).unwrap_or_default()),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, data } => {
                let arr = if data.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), data.clone()])
                };
                format!("42{arr}")
            }
            Packet::ConnectError(v) => format!("44{v}"),
            Packet::Noop => "6".to_string(),
        }
    }

    /// 解析文本帧。
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => Self::decode_socket(rest),
            '6' => Ok(Packet::Noop),
            other => Err(PacketError::Unsupported(other.to_string())),
        }
    }

    fn decode_socket(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        if rest.starts_with('/') {
            return Err(PacketError::Unsupported(format!("namespace {rest}")));
        }
        match kind {
            '0' if rest.trim().is_empty() => Ok(Packet::Connect(None)),
            '0' => Ok(Packet::Connect(Some(serde_json::from_str(rest)?))),
            '1' => Ok(Packet::Disconnect),
            '2' => {
                // 跳过可选的 ack id（事件帧中 `42` 与 `[` 之间的数字）。
                let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());
                let value: Value = serde_json::from_str(body)?;
                let mut items = match value {
                    Value::Array(items) => items.into_iter(),
                    _ => return Err(PacketError::BadEvent),
                };
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(PacketError::BadEvent),
                };
                let data = items.next().unwrap_or(Value::Null);
                Ok(Packet::Event { name, data })
            }
            '4' => {
                let reason =
                    if rest.is_empty() { Value::Null } else { serde_json::from_str(rest)? };
                Ok(Packet::ConnectError(reason))
            }
            other => Err(PacketError::Unsupported(format!("4{other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_map_back() {
        for e in InboundEvent::ALL {
            assert_eq!(InboundEvent::from_name(e.name()), Some(e));
        }
        assert_eq!(InboundEvent::from_name("joinRoom"), None);
    }

    #[test]
    fn decode_handshake_and_heartbeat() {
        let p = Packet::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
        )
        .unwrap();
        let expected =
            OpenHandshake { sid: "abc".into(), ping_interval: 25000, ping_timeout: 20000 };
        assert_eq!(p, Packet::Open(expected));
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::Pong.encode(), "3");
    }

    #[test]
    fn connect_carries_auth() {
        let p = Packet::Connect(Some(json!({"token": "t"})));
        assert_eq!(p.encode(), r#"40{"token":"t"}"#);
        assert_eq!(
            Packet::decode(r#"40{"sid":"x"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "x"})))
        );
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
    }

    #[test]
    fn event_frames() {
        let p = Packet::event("joinRoom", json!({"userId": "u1", "role": "admin"}));
        let text = p.encode();
        assert!(text.starts_with(r#"42["joinRoom",{"#), "{text}");
        assert_eq!(Packet::decode(&text).unwrap(), p);
        assert_eq!(Packet::event("leaveRoom", Value::Null).encode(), r#"42["leaveRoom"]"#);

        let p = Packet::decode(r#"42["forceLogout"]"#).unwrap();
        assert_eq!(p, Packet::Event { name: "forceLogout".into(), data: Value::Null });

        let p = Packet::decode(r#"4217["userTyping",{"bidId":"b"}]"#).unwrap();
        assert_eq!(p, Packet::event("userTyping", json!({"bidId": "b"})));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(Packet::decode(""), Err(PacketError::Empty)));
        assert!(matches!(Packet::decode("42{}"), Err(PacketError::BadEvent)));
        assert!(matches!(Packet::decode("42[1]"), Err(PacketError::BadEvent)));
        assert!(matches!(Packet::decode("40/admin,"), Err(PacketError::Unsupported(_))));
        assert!(matches!(Packet::decode("9"), Err(PacketError::Unsupported(_))));
    }
}
