//! 竞拍管理后台命令行控制台（bidhub-console）。
//!
//! 职责：
//! - 登录/退出，管理本地会话（`local-storage.json`）
//! - 加载、刷新与查询当前管理员的权限快照
//! - 查看议价会话（按竞拍分组），还价与接受报价
//! - 保持实时通道连接，打印推送事件；收到权限变更时刷新快照，收到强制下线时退出
//!
//! 配置：
//! - 默认读取 `<data_dir>/console-config.json`，`--config` / `--base-url` 可覆盖
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bidhub_client::gateway::GatewayClient;
use bidhub_client::permissions::PermissionCache;
use bidhub_client::relay::{LogNavigator, RealtimeRelay, RelayOptions};
use bidhub_core::api::{
    AcceptOfferRequest, CounterOfferRequest, LoginRequest, NegotiationListRequest,
};
use bidhub_core::config::ConsoleConfig;
use bidhub_core::negotiation::{self, NegotiationGroup, Party};
use bidhub_core::permission::PermissionKind;
use bidhub_core::realtime::InboundEvent;
use bidhub_core::sequence::RequestSequencer;
use bidhub_core::paths;
use bidhub_core::session::{FileStore, SessionContext};
use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

/// 议价模块在权限快照中的路径。
const NEGOTIATIONS_MODULE: &str = "/negotiations";

/// 命令行参数。
///
/// 说明：
/// - `config` 指向配置文件（默认 `<data_dir>/console-config.json`）
/// - `base_url` 覆盖配置文件中的后端地址
#[derive(Debug, Parser)]
#[command(name = "bidhub-console", version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// 控制台支持的子命令。
#[derive(Debug, Subcommand)]
enum Commands {
    /// 登录并保存会话。
    Login {
        #[arg(long)]
        email: String,
        /// 未提供时读取环境变量 `BIDHUB_PASSWORD`。
        #[arg(long, env = "BIDHUB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// 退出登录并清除本地会话。
    Logout,
    /// 显示当前会话信息。
    Whoami,
    /// 显示权限快照（`--refresh` 强制重新拉取）。
    Permissions {
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// 判定某模块的权限。
    Check {
        #[arg(long)]
        module: String,
        /// read / write / verifyApprove；缺省时判定访问权限。
        #[arg(long)]
        kind: Option<PermissionKind>,
    },
    /// 按竞拍分组列出议价会话。
    Negotiations {
        #[arg(long)]
        bid: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// 对某竞拍还价。
    Counter {
        #[arg(long)]
        bid: String,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        quantity: Option<u64>,
        #[arg(long)]
        message: Option<String>,
    },
    /// 接受某条报价。
    Accept {
        #[arg(long)]
        bid: String,
        #[arg(long)]
        id: String,
    },
    /// 连接实时通道并打印推送事件（Ctrl-C 退出）。
    Listen {
        /// 同时加入该竞拍的议价房间。
        #[arg(long)]
        bid: Option<String>,
    },
    /// 环境自检（配置、数据目录、会话状态）。
    Doctor,
}

/// 进程内共享的上下文：配置、会话、网关与权限缓存。
struct Console {
    config: ConsoleConfig,
    config_path: PathBuf,
    session: Arc<SessionContext>,
    gateway: GatewayClient,
    permissions: PermissionCache,
}

impl Console {
    fn open(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(p) => p.clone(),
            None => paths::default_config_file()?,
        };
        let mut config = ConsoleConfig::load(&config_path)?;
        if let Some(base_url) = &cli.base_url {
            config.base_url = base_url.clone();
        }

        let store_path = paths::default_store_file()?;
        let session = Arc::new(SessionContext::new(Arc::new(FileStore::new(store_path))));
        let gateway = GatewayClient::new(&config)
            .context("创建 HTTP 客户端失败")?
            .with_session(session.clone());
        let permissions =
            PermissionCache::new(session.clone(), gateway.clone(), config.permission_fallback);
        Ok(Self { config, config_path, session, gateway, permissions })
    }

    fn require_login(&self) -> Result<()> {
        if self.session.token()?.is_none() {
            return Err(anyhow!("尚未登录，请先执行 bidhub-console login"));
        }
        Ok(())
    }
}

/// 程序入口：解析参数并分发子命令。
///
/// 异常处理：
/// - 任意子命令失败会返回 `Err`，由运行时打印错误并以非零码退出
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::level_filters::LevelFilter::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let console = Console::open(&cli)?;
    match &cli.command {
        Commands::Login { email, password } => login(&console, email, password).await,
        Commands::Logout => logout(&console).await,
        Commands::Whoami => whoami(&console),
        Commands::Permissions { refresh } => show_permissions(&console, *refresh).await,
        Commands::Check { module, kind } => check(&console, module, *kind).await,
        Commands::Negotiations { bid, page, limit } => {
            let req = NegotiationListRequest { bid_id: bid.clone(), page: *page, limit: *limit };
            list_negotiations(&console, &req).await
        }
        Commands::Counter { bid, price, quantity, message } => {
            let req = CounterOfferRequest {
                bid_id: bid.clone(),
                price: *price,
                quantity: *quantity,
                message: message.clone(),
            };
            counter(&console, &req).await
        }
        Commands::Accept { bid, id } => accept(&console, bid, id).await,
        Commands::Listen { bid } => listen(&console, bid.as_deref()).await,
        Commands::Doctor => doctor(&console),
    }
}

/// 登录：成功后建立会话；登录响应未携带权限时立即拉取一次。
async fn login(console: &Console, email: &str, password: &str) -> Result<()> {
    let req = LoginRequest { email: email.to_string(), password: password.to_string() };
    let data = console.gateway.login(&req).await.context("登录失败")?;
    let has_permissions = data.permissions.is_some();
    console.session.begin(&data.token, &data.user, data.permissions)?;
    if !has_permissions {
        console.permissions.load().await;
    }
    info!("登录成功: {} ({})", data.user.name, data.user.id);
    println!("user = {}", data.user.id);
    Ok(())
}

/// 退出：后端退出失败只告警，本地会话总是清除。
async fn logout(console: &Console) -> Result<()> {
    if console.session.token()?.is_some() {
        if let Err(e) = console.gateway.logout().await {
            warn!("后端退出失败（本地会话仍会清除）: {e}");
        }
    }
    console.session.end()?;
    println!("logged_out = true");
    Ok(())
}

fn whoami(console: &Console) -> Result<()> {
    match console.session.user()? {
        Some(user) => {
            println!("user = {}", user.id);
            println!("name = {}", user.name);
            println!("email = {}", user.email);
            println!("role = {}", console.session.role()?.unwrap_or_default());
        }
        None => println!("user = <none>"),
    }
    Ok(())
}

async fn show_permissions(console: &Console, refresh: bool) -> Result<()> {
    console.require_login()?;
    let loaded = if refresh {
        console.permissions.refresh().await
    } else {
        console.permissions.load().await
    };
    println!("origin = {:?}", loaded.origin);
    println!("{}", serde_json::to_string_pretty(&loaded.snapshot)?);
    Ok(())
}

/// 权限判定，输出 `<module> <kind> = <bool>`。
async fn check(console: &Console, module: &str, kind: Option<PermissionKind>) -> Result<()> {
    console.require_login()?;
    console.permissions.load().await;
    match kind {
        Some(kind) => {
            println!("{module} {kind} = {}", console.permissions.has_permission(module, kind))
        }
        None => println!("{module} access = {}", console.permissions.has_access(module)),
    }
    Ok(())
}

fn print_group(group: &NegotiationGroup) {
    println!(
        "bid {} accepted = {} can_counter = {}",
        group.bid_id,
        negotiation::has_accepted_negotiation(group),
        negotiation::can_make_counter_for_bid(group)
    );
    for r in &group.records {
        println!(
            "  {} {:?} {:?} price={} at={} can_accept={}",
            r.id,
            r.offered_by,
            r.status,
            r.price,
            r.created_at.format(&Rfc3339).unwrap_or_default(),
            negotiation::can_accept(group, &r.id, Party::Admin)
        );
    }
}

async fn fetch_groups(
    gateway: &GatewayClient,
    req: &NegotiationListRequest,
) -> Result<Vec<NegotiationGroup>> {
    let page = gateway.list_negotiations(req).await.context("获取议价列表失败")?;
    Ok(negotiation::group_by_bid(page.items))
}

async fn list_negotiations(console: &Console, req: &NegotiationListRequest) -> Result<()> {
    console.require_login()?;
    console.permissions.load().await;
    if !console.permissions.has_permission(NEGOTIATIONS_MODULE, PermissionKind::Read) {
        return Err(anyhow!("无权限查看议价"));
    }
    for group in fetch_groups(&console.gateway, req).await? {
        print_group(&group);
    }
    Ok(())
}

/// 还价：需要议价模块写权限，且该竞拍尚未成交。
async fn counter(console: &Console, req: &CounterOfferRequest) -> Result<()> {
    console.require_login()?;
    req.validate()?;
    console.permissions.load().await;
    if !console.permissions.has_permission(NEGOTIATIONS_MODULE, PermissionKind::Write) {
        return Err(anyhow!("无权限还价"));
    }
    let list = NegotiationListRequest { bid_id: Some(req.bid_id.clone()), ..Default::default() };
    let groups = fetch_groups(&console.gateway, &list).await?;
    if let Some(group) = groups.iter().find(|g| g.bid_id == req.bid_id) {
        if !negotiation::can_make_counter_for_bid(group) {
            return Err(anyhow!("竞拍 {} 已成交，不能再还价", req.bid_id));
        }
    }
    let record = console.gateway.counter_offer(req).await.context("还价失败")?;
    println!("counter = {}", record.id);
    Ok(())
}

/// 接受报价：只能接受对方最近一条待处理报价；最终结果以后端为准。
async fn accept(console: &Console, bid: &str, id: &str) -> Result<()> {
    console.require_login()?;
    console.permissions.load().await;
    if !console.permissions.has_permission(NEGOTIATIONS_MODULE, PermissionKind::Write) {
        return Err(anyhow!("无权限接受报价"));
    }
    let list = NegotiationListRequest { bid_id: Some(bid.to_string()), ..Default::default() };
    let groups = fetch_groups(&console.gateway, &list).await?;
    let group = groups
        .iter()
        .find(|g| g.bid_id == bid)
        .ok_or_else(|| anyhow!("未找到竞拍 {bid} 的议价记录"))?;
    if !negotiation::can_accept(group, id, Party::Admin) {
        return Err(anyhow!("报价 {id} 当前不可接受"));
    }
    let record = console
        .gateway
        .accept_offer(&AcceptOfferRequest { negotiation_id: id.to_string() })
        .await
        .context("接受报价失败")?;
    println!("accepted = {}", record.id);
    Ok(())
}

/// 实时监听：打印推送事件；议价变化时重新拉取列表（只展示最新一次请求的结果）。
async fn listen(console: &Console, bid: Option<&str>) -> Result<()> {
    console.require_login()?;
    console.permissions.load().await;

    let relay = RealtimeRelay::new(
        RelayOptions::from_config(&console.config),
        console.session.clone(),
        Arc::new(LogNavigator),
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<InboundEvent>();
    let mut subscriptions = Vec::new();
    for event in InboundEvent::ALL {
        let tx = tx.clone();
        subscriptions.push(relay.on_event(event, move |data| {
            println!("event {} = {}", event.name(), data);
            let _ = tx.send(event);
        }));
    }
    drop(tx);

    if !relay.connect()? {
        return Err(anyhow!("实时通道未启动（本地无令牌）"));
    }
    if let Some(bid) = bid {
        relay.join_negotiation(bid);
        relay.mark_negotiation_read(bid);
    }

    let sequencer = Arc::new(RequestSequencer::new());
    let list = NegotiationListRequest { bid_id: bid.map(str::to_string), ..Default::default() };
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(InboundEvent::ForceLogout) => {
                    // 等待跳转提示输出后退出
                    tokio::time::sleep(console.config.force_logout_redirect_delay()).await;
                    break;
                }
                Some(InboundEvent::PermissionsUpdated) => {
                    let loaded = console.permissions.refresh().await;
                    println!("permissions_refreshed = {:?}", loaded.origin);
                }
                Some(
                    InboundEvent::NegotiationUpdate
                    | InboundEvent::NegotiationNotification
                    | InboundEvent::NegotiationBroadcast,
                ) => {
                    let ticket = sequencer.issue();
                    let gateway = console.gateway.clone();
                    let sequencer = sequencer.clone();
                    let list = list.clone();
                    tokio::spawn(async move {
                        match fetch_groups(&gateway, &list).await {
                            Ok(groups) => {
                                sequencer.apply(ticket, groups, |groups| {
                                    groups.iter().for_each(print_group)
                                });
                            }
                            Err(e) => warn!("{e:#}"),
                        }
                    });
                }
                Some(_) => {}
                None => break,
            },
            // 认证被拒或重连次数用尽时连接任务结束，不再有事件
            _ = relay.closed() => {
                warn!("实时通道已关闭，停止监听");
                break;
            }
        }
    }

    for sub in subscriptions {
        sub.unsubscribe();
    }
    if relay.is_connected() {
        if let Some(bid) = bid {
            relay.leave_negotiation(bid);
        }
        relay.leave_room();
    }
    relay.disconnect();
    Ok(())
}

/// 环境自检（用于排障），不访问网络。
fn doctor(console: &Console) -> Result<()> {
    println!("data_dir = {}", paths::data_dir()?.display());
    println!("config = {}", console.config_path.display());
    println!("config_exists = {}", console.config_path.exists());
    println!("api = {}", console.gateway.routes().url("auth", "login"));
    println!("socket = {}", console.config.socket_url());
    println!("permission_fallback = {:?}", console.config.permission_fallback);
    println!("logged_in = {}", console.session.token()?.is_some());
    Ok(())
}
