//! 实时事件中继：每个会话一条 websocket 连接，按事件名分发给已注册的回调。
//!
//! 行为：
//! - `connect()`：本地没有令牌或已连接时为空操作；否则在后台任务中建立连接，
//!   令牌放在 socket.io 命名空间连接帧的认证参数里
//! - 连接成功（含重连成功）后自动发送 `joinRoom { userId, role: "admin" }`
//! - 断线后按固定间隔重连，次数有上限；成功连上后计数清零
//! - 收到 `forceLogout`：销毁会话上下文（存储键与进程内权限缓存），延迟后跳转登录页，并结束连接
//! - `disconnect()`：先移除全部回调，再关闭连接；可重复调用
//!
//! 异常处理：
//! - 连接/收发失败不向 `on`/`emit` 的调用方返回错误，只写日志并交给重连逻辑
//! - 服务端拒绝认证（`44`）或主动断开命名空间（`41`）时不再重连
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bidhub_core::config::ConsoleConfig;
use bidhub_core::realtime::{
    InboundEvent, NegotiationRoomPayload, OutboundEvent, Packet, RoomPayload, TypingPayload,
};
use bidhub_core::session::{SessionContext, StoreError};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// 页面跳转接口（强制下线后跳转登录页）。
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// 只写日志的跳转实现（命令行场景没有页面可跳）。
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &str) {
        info!("会话已失效，请重新登录（跳转 {route}）");
    }
}

/// 事件回调。
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// 中继错误（仅配置类错误会返回给调用方）。
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("实时通道地址无效: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("实时通道地址协议不受支持: {0}（应为 ws/wss）")]
    UnsupportedScheme(String),
    #[error("读取本地会话失败: {0}")]
    Store(#[from] StoreError),
}

/// 中继参数。
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub force_logout_redirect_delay: Duration,
    pub sign_in_route: String,
}

impl RelayOptions {
    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self {
            url: config.socket_url(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            force_logout_redirect_delay: config.force_logout_redirect_delay(),
            sign_in_route: config.sign_in_route.clone(),
        }
    }
}

#[derive(Default)]
struct Listeners {
    by_event: HashMap<String, Vec<(Uuid, Handler)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 订阅句柄：调用 [`Subscription::unsubscribe`] 只移除这一个回调。
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    event: String,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// 移除回调；回调已被移除（例如中继已断开）时返回 `false`。
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut guard = lock(&listeners);
        let Some(handlers) = guard.by_event.get_mut(&self.event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            guard.by_event.remove(&self.event);
        }
        removed
    }
}

/// 中继与后台任务共享的状态。
struct Shared {
    options: RelayOptions,
    session: Arc<SessionContext>,
    navigator: Arc<dyn Navigator>,
    listeners: Arc<Mutex<Listeners>>,
    connected: AtomicBool,
}

impl Shared {
    fn dispatch(&self, name: &str, data: &Value) {
        // 先复制回调列表再调用，回调里可以安全地订阅/退订。
        let handlers: Vec<Handler> = lock(&self.listeners)
            .by_event
            .get(name)
            .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!("事件无订阅者: {name}");
        }
        for handler in handlers {
            handler(data);
        }
    }

    /// 处理一条入站事件；返回 `true` 表示会话已被服务端强制结束。
    fn handle_inbound(&self, name: &str, data: &Value) -> bool {
        self.dispatch(name, data);
        if InboundEvent::from_name(name) == Some(InboundEvent::ForceLogout) {
            self.force_logout();
            return true;
        }
        false
    }

    fn force_logout(&self) {
        warn!("收到 forceLogout，清除本地会话");
        if let Err(e) = self.session.end() {
            warn!("清除本地会话失败: {e}");
        }
        let navigator = self.navigator.clone();
        let route = self.options.sign_in_route.clone();
        let delay = self.options.force_logout_redirect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&route);
        });
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Packet>,
    task: JoinHandle<()>,
    /// 后台任务结束时置为 `true`。
    finished: watch::Receiver<bool>,
}

/// 实时事件中继。
///
/// 注意：
/// - `connect`/`emit`/收到 `forceLogout` 时会创建后台任务，必须在 Tokio 运行时内调用
pub struct RealtimeRelay {
    shared: Arc<Shared>,
    conn: Mutex<Option<Connection>>,
}

impl RealtimeRelay {
    pub fn new(
        options: RelayOptions,
        session: Arc<SessionContext>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                session,
                navigator,
                listeners: Arc::new(Mutex::new(Listeners::default())),
                connected: AtomicBool::new(false),
            }),
            conn: Mutex::new(None),
        }
    }

    /// 建立连接。
    ///
    /// 返回值：
    /// - `Ok(true)`：已启动新的连接任务
    /// - `Ok(false)`：没有令牌或已有活动连接，未做任何事
    pub fn connect(&self) -> Result<bool, RelayError> {
        let mut conn = lock(&self.conn);
        if conn.as_ref().is_some_and(|c| !c.task.is_finished()) {
            debug!("实时通道已连接，忽略 connect");
            return Ok(false);
        }
        let session = &self.shared.session;
        let Some(token) = session.token()? else {
            debug!("本地无令牌，跳过实时通道连接");
            return Ok(false);
        };
        let user_id = session.user_id()?;

        let url = Url::parse(&self.shared.options.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::UnsupportedScheme(url.scheme().to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, finished) = watch::channel(false);
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            run(shared, url, token, user_id, rx).await;
            let _ = done_tx.send(true);
        });
        *conn = Some(Connection { outbound: tx, task, finished });
        info!("实时通道连接中: {}", self.shared.options.url);
        Ok(true)
    }

    /// 断开连接：先移除全部回调再关闭；可重复调用。
    pub fn disconnect(&self) {
        lock(&self.shared.listeners).by_event.clear();
        if let Some(conn) = lock(&self.conn).take() {
            // 发送端被丢弃后，后台任务发出 `41` 并关闭 websocket。
            drop(conn.outbound);
            info!("实时通道已断开");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// 当前是否已完成命名空间连接。
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// 是否存在连接任务（可能正在连接或重连）。
    pub fn is_active(&self) -> bool {
        lock(&self.conn).as_ref().is_some_and(|c| !c.task.is_finished())
    }

    /// 等待后台连接任务结束（本地断开、强制下线、认证被拒或重连次数用尽）。
    /// 没有连接任务时立即返回。
    pub async fn closed(&self) {
        let finished = lock(&self.conn).as_ref().map(|c| c.finished.clone());
        if let Some(mut finished) = finished {
            // 发送端被丢弃同样意味着任务已结束
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    /// 注册事件回调。
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        lock(&self.shared.listeners)
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            event: event.to_string(),
            listeners: Arc::downgrade(&self.shared.listeners),
        }
    }

    /// 注册已知入站事件的回调。
    pub fn on_event<F>(&self, event: InboundEvent, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(event.name(), handler)
    }

    /// 本地投递一条入站事件（与从服务端收到的处理路径相同）。
    pub fn handle_inbound(&self, name: &str, data: &Value) {
        self.shared.handle_inbound(name, data);
    }

    /// 发送事件（不等待结果）。未连接时会在连接建立后补发；没有连接任务时丢弃。
    pub fn emit<T: Serialize>(&self, event: OutboundEvent, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("事件 {} 序列化失败: {e}", event.name());
                return;
            }
        };
        let sent = lock(&self.conn)
            .as_ref()
            .map(|c| c.outbound.send(Packet::event(event.name(), data)).is_ok())
            .unwrap_or(false);
        if !sent {
            debug!("实时通道未连接，丢弃事件 {}", event.name());
        }
    }

    fn room_payload(&self, bid_id: &str) -> NegotiationRoomPayload {
        NegotiationRoomPayload { bid_id: bid_id.to_string(), user_id: self.current_user_id() }
    }

    fn current_user_id(&self) -> String {
        self.shared.session.user_id().ok().flatten().unwrap_or_default()
    }

    pub fn leave_room(&self) {
        self.emit(OutboundEvent::LeaveRoom, &RoomPayload::admin(self.current_user_id()));
    }

    pub fn join_negotiation(&self, bid_id: &str) {
        let payload = self.room_payload(bid_id);
        self.emit(OutboundEvent::JoinNegotiation, &payload);
    }

    pub fn leave_negotiation(&self, bid_id: &str) {
        let payload = self.room_payload(bid_id);
        self.emit(OutboundEvent::LeaveNegotiation, &payload);
    }

    pub fn typing(&self, bid_id: &str, is_typing: bool) {
        let payload = TypingPayload {
            bid_id: bid_id.to_string(),
            user_id: self.current_user_id(),
            is_typing,
        };
        self.emit(OutboundEvent::NegotiationTyping, &payload);
    }

    pub fn mark_negotiation_read(&self, bid_id: &str) {
        let payload = self.room_payload(bid_id);
        self.emit(OutboundEvent::MarkNegotiationRead, &payload);
    }

    pub fn send_to_all(&self, message: &str) {
        self.emit(OutboundEvent::SendToAll, &json!({ "message": message }));
    }
}

impl Drop for RealtimeRelay {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// 单次连接的结束原因。
enum SessionEnd {
    /// 本地调用了 disconnect。
    Closed,
    /// 服务端强制下线。
    ForcedOut,
    /// 服务端拒绝认证或主动断开命名空间，不再重连。
    Rejected,
    /// 断线，需要重连。
    Dropped,
}

/// 后台任务：连接 + 按固定间隔有限次重连。
async fn run(
    shared: Arc<Shared>,
    url: Url,
    token: String,
    user_id: Option<String>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
) {
    let mut pending: VecDeque<Packet> = VecDeque::new();
    let mut attempts = 0u32;
    loop {
        let mut joined = false;
        let user_id = user_id.as_deref();
        let end = session(&shared, &url, &token, user_id, &mut rx, &mut pending, &mut joined).await;
        shared.connected.store(false, Ordering::SeqCst);
        match end {
            SessionEnd::Closed | SessionEnd::ForcedOut | SessionEnd::Rejected => return,
            SessionEnd::Dropped => {}
        }
        if joined {
            attempts = 0;
        }
        if attempts >= shared.options.reconnect_attempts {
            warn!("实时通道重连 {attempts} 次仍失败，放弃");
            return;
        }
        attempts += 1;
        debug!("实时通道 {:?} 后第 {attempts} 次重连", shared.options.reconnect_delay);
        // 等待期间若本地已 disconnect，直接退出。
        let sleep = tokio::time::sleep(shared.options.reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                msg = rx.recv() => match msg {
                    Some(packet) => pending.push_back(packet),
                    None => return,
                },
            }
        }
    }
}

async fn session(
    shared: &Shared,
    url: &Url,
    token: &str,
    user_id: Option<&str>,
    rx: &mut mpsc::UnboundedReceiver<Packet>,
    pending: &mut VecDeque<Packet>,
    joined: &mut bool,
) -> SessionEnd {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!("实时通道连接失败: {e}");
            return SessionEnd::Dropped;
        }
    };
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    None => {
                        info!("实时通道被关闭");
                        return SessionEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        warn!("实时通道读取失败: {e}");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => return SessionEnd::Dropped,
                    Some(Ok(_)) => continue,
                };
                let packet = match Packet::decode(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("忽略无法解析的帧: {e}");
                        continue;
                    }
                };
                let reply = match packet {
                    Packet::Open(_) => Some(Packet::Connect(Some(json!({ "token": token })))),
                    Packet::Ping => Some(Packet::Pong),
                    Packet::Connect(_) => {
                        *joined = true;
                        shared.connected.store(true, Ordering::SeqCst);
                        info!("实时通道已连接");
                        if let Some(uid) = user_id {
                            let room = serde_json::to_value(RoomPayload::admin(uid))
                                .unwrap_or(Value::Null);
                            pending.push_front(Packet::event(OutboundEvent::JoinRoom.name(), room));
                        }
                        let mut failed = false;
                        while let Some(p) = pending.pop_front() {
                            if let Err(e) = sink.send(Message::Text(p.encode())).await {
                                warn!("实时通道发送失败: {e}");
                                pending.push_front(p);
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            return SessionEnd::Dropped;
                        }
                        None
                    }
                    Packet::Event { name, data } => {
                        if shared.handle_inbound(&name, &data) {
                            let _ = sink.close().await;
                            return SessionEnd::ForcedOut;
                        }
                        None
                    }
                    Packet::ConnectError(reason) => {
                        warn!("实时通道认证被拒绝: {reason}");
                        let _ = sink.close().await;
                        return SessionEnd::Rejected;
                    }
                    Packet::Disconnect => {
                        info!("服务端断开了实时通道");
                        let _ = sink.close().await;
                        return SessionEnd::Rejected;
                    }
                    Packet::Close => return SessionEnd::Dropped,
                    Packet::Pong | Packet::Noop => None,
                };
                if let Some(reply) = reply {
                    if let Err(e) = sink.send(Message::Text(reply.encode())).await {
                        warn!("实时通道发送失败: {e}");
                        return SessionEnd::Dropped;
                    }
                }
            }
            outgoing = rx.recv() => match outgoing {
                Some(packet) if *joined => {
                    if let Err(e) = sink.send(Message::Text(packet.encode())).await {
                        warn!("实时通道发送失败: {e}");
                        pending.push_back(packet);
                        return SessionEnd::Dropped;
                    }
                }
                Some(packet) => pending.push_back(packet),
                None => {
                    if *joined {
                        let _ = sink.send(Message::Text(Packet::Disconnect.encode())).await;
                    }
                    let _ = sink.close().await;
                    return SessionEnd::Closed;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidhub_core::permission::PermissionSnapshot;
    use bidhub_core::session::{keys, write_json, KeyValueStore, MemoryStore};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingNavigator {
        routes: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: &str) {
            lock(&self.routes).push(route.to_string());
        }
    }

    fn options() -> RelayOptions {
        RelayOptions::from_config(&ConsoleConfig::default())
    }

    fn session_over(store: Arc<MemoryStore>) -> Arc<SessionContext> {
        Arc::new(SessionContext::new(store))
    }

    fn anonymous_relay() -> RealtimeRelay {
        let session = session_over(Arc::new(MemoryStore::new()));
        RealtimeRelay::new(options(), session, Arc::new(LogNavigator))
    }

    #[test]
    fn connect_without_token_is_a_noop() {
        let relay = anonymous_relay();
        // 不在 Tokio 运行时内：若真的创建连接任务会 panic
        assert!(!relay.connect().unwrap());
        assert!(!relay.is_active());
        assert!(!relay.is_connected());
    }

    #[test]
    fn rejects_non_websocket_url() {
        let store = Arc::new(MemoryStore::new());
        write_json(store.as_ref(), keys::TOKEN, &"tok").unwrap();
        let mut opts = options();
        opts.url = "http://localhost:5000/socket.io/".into();
        let relay = RealtimeRelay::new(opts, session_over(store), Arc::new(LogNavigator));
        assert!(matches!(relay.connect(), Err(RelayError::UnsupportedScheme(_))));
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let relay = anonymous_relay();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        let first = relay.on("message", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = hits.clone();
        let _second = relay.on("message", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        relay.handle_inbound("message", &json!({"text": "hi"}));
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert_eq!(first.event(), "message");
        assert!(first.unsubscribe());
        relay.handle_inbound("message", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn disconnect_drops_all_listeners_and_is_idempotent() {
        let relay = anonymous_relay();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = relay.on_event(InboundEvent::UserTyping, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        relay.disconnect();
        relay.disconnect();
        relay.handle_inbound("userTyping", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!sub.unsubscribe());
    }

    #[tokio::test(start_paused = true)]
    async fn force_logout_clears_session_and_redirects_after_delay() {
        let store = Arc::new(MemoryStore::new());
        for key in keys::SESSION {
            write_json(store.as_ref(), key, &"x").unwrap();
        }
        write_json(store.as_ref(), "theme", &"dark").unwrap();
        let session = session_over(store.clone());
        let orders: PermissionSnapshot = serde_json::from_value(json!({
            "role": "admin",
            "modules": [{"path": "/orders", "permissions": {"read": true, "write": true}}]
        }))
        .unwrap();
        session.replace_permissions(orders).unwrap();
        let navigator = Arc::new(RecordingNavigator::default());
        let relay = RealtimeRelay::new(options(), session.clone(), navigator.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = relay.on_event(InboundEvent::ForceLogout, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        relay.handle_inbound("forceLogout", &Value::Null);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        for key in keys::SESSION {
            assert!(store.get(key).unwrap().is_none(), "{key} not cleared");
        }
        // 进程内缓存的快照也一并失效
        assert!(session.cached_permissions().is_none());
        assert!(session.stored_permissions().unwrap().is_none());
        assert!(session.token().unwrap().is_none());
        // 与会话无关的键保留
        assert!(store.get("theme").unwrap().is_some());
        assert!(lock(&navigator.routes).is_empty());

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(lock(&navigator.routes).is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*lock(&navigator.routes), vec!["/signin".to_string()]);
    }
}
