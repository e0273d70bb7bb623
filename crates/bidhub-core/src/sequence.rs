//! 请求序号器：只允许最新一次请求的响应落地。
//!
//! 场景：
//! - 快速翻页时多个请求并发在途，响应返回顺序与发出顺序不一致
//! - 每次发请求前领取 [`Ticket`]，响应回来后用 [`RequestSequencer::apply`] 判断是否仍是最新
//!
//! 作者：BidHub 管理后台项目组
//! 创建时间：2026-10-18
//! 修改时间：2026-10-18

use std::sync::atomic::{AtomicU64, Ordering};

/// 请求凭据（单调递增）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 领取新凭据；之前领取的凭据全部过期。
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// 凭据仍为最新时执行 `sink` 并返回 `true`；否则丢弃响应返回 `false`。
    pub fn apply<T>(&self, ticket: Ticket, value: T, sink: impl FnOnce(T)) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!("丢弃过期响应: ticket={}", ticket.0);
            return false;
        }
        sink(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_response_is_dropped() {
        let seq = RequestSequencer::new();
        let page1 = seq.issue();
        let page2 = seq.issue();
        assert!(page2 > page1);

        let mut shown = Vec::new();
        // 第二页先返回
        assert!(seq.apply(page2, 2, |v| shown.push(v)));
        // 第一页后返回，必须被丢弃
        assert!(!seq.apply(page1, 1, |v| shown.push(v)));
        assert_eq!(shown, vec![2]);
    }
}
