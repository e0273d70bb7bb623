//! 议价记录：按竞拍分组、排序与可操作性判定。
//!
//! 议价状态机完全由后端维护，本模块只对已拉取的数据做纯函数计算：
//! - 按 `bidId` 分组；组内任一记录为 `accepted` 即整组视为已成交
//! - 组按最近一条记录时间倒序；组内记录按时间正序（最早报价在前）
//! - 还价：组内无已接受记录时才允许
//! - 接受：只能接受该竞拍最近一条待处理记录，且必须来自对方
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// 议价参与方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// 平台管理员。
    Admin,
    /// 买家/卖家用户。
    User,
}

impl Party {
    /// 对方。
    pub fn counterparty(&self) -> Party {
        match self {
            Party::Admin => Party::User,
            Party::User => Party::Admin,
        }
    }
}

/// 单条议价记录状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
}

/// 单条议价记录（报价或还价）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub bid_id: String,
    pub offered_by: Party,
    pub price: f64,
    #[serde(default)]
    pub quantity: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    pub status: NegotiationStatus,
    #[serde(default)]
    pub accepted_by: Option<Party>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl NegotiationRecord {
    pub fn is_accepted(&self) -> bool {
        self.status == NegotiationStatus::Accepted
    }

    pub fn is_pending(&self) -> bool {
        self.status == NegotiationStatus::Pending
    }
}

/// 同一竞拍下的议价会话。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationGroup {
    pub bid_id: String,
    /// 按时间正序。
    pub records: Vec<NegotiationRecord>,
    pub accepted: bool,
    pub accepted_by: Option<Party>,
}

impl NegotiationGroup {
    fn from_records(bid_id: String, mut records: Vec<NegotiationRecord>) -> Self {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let accepted_record = records.iter().find(|r| r.is_accepted());
        let accepted = accepted_record.is_some();
        let accepted_by =
            accepted_record.map(|r| r.accepted_by.unwrap_or_else(|| r.offered_by.counterparty()));
        Self {
            bid_id,
            accepted,
            accepted_by,
            records,
        }
    }

    /// 最近一条记录的时间（空组返回 `None`）。
    pub fn latest_at(&self) -> Option<OffsetDateTime> {
        self.records.last().map(|r| r.created_at)
    }

    /// 最近一条待处理记录。
    pub fn latest_pending(&self) -> Option<&NegotiationRecord> {
        self.records.iter().rev().find(|r| r.is_pending())
    }
}

/// 按竞拍分组并排序。
pub fn group_by_bid<I>(records: I) -> Vec<NegotiationGroup>
where
    I: IntoIterator<Item = NegotiationRecord>,
{
    let mut buckets: BTreeMap<String, Vec<NegotiationRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.bid_id.clone()).or_default().push(record);
    }
    let mut groups: Vec<NegotiationGroup> = buckets
        .into_iter()
        .map(|(bid_id, records)| NegotiationGroup::from_records(bid_id, records))
        .collect();
    // 时间相同按 bid_id 排，保证多次分组结果一致。
    groups.sort_by(|a, b| b.latest_at().cmp(&a.latest_at()).then_with(|| a.bid_id.cmp(&b.bid_id)));
    groups
}

/// 将分组结果按展示顺序摊平。
pub fn flatten(groups: &[NegotiationGroup]) -> Vec<NegotiationRecord> {
    groups.iter().flat_map(|g| g.records.iter().cloned()).collect()
}

/// 该竞拍是否已成交。
pub fn has_accepted_negotiation(group: &NegotiationGroup) -> bool {
    group.records.iter().any(NegotiationRecord::is_accepted)
}

/// 能否对该竞拍继续还价。
pub fn can_make_counter_for_bid(group: &NegotiationGroup) -> bool {
    !has_accepted_negotiation(group)
}

/// `viewer` 能否接受指定记录。
pub fn can_accept(group: &NegotiationGroup, record_id: &str, viewer: Party) -> bool {
    if has_accepted_negotiation(group) {
        return false;
    }
    match group.latest_pending() {
        Some(latest) => latest.id == record_id && latest.offered_by == viewer.counterparty(),
        None => false,
    }
}
