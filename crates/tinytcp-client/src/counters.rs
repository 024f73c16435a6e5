use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 请求/响应流量计数器。
///
/// 两个计数彼此独立、只增不减；发送路径在调用方线程递增，
/// 接收路径在工作线程递增，原子操作之外不需要额外加锁。
#[derive(Debug, Default)]
pub struct TrafficCounters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次进入写阶段的请求，返回递增后的值。
    pub fn record_request(&self) -> u64 {
        self.requests_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 记录一次入站数据事件，返回递增后的值。
    pub fn record_response(&self) -> u64 {
        self.responses_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn responses_received(&self) -> u64 {
        self.responses_received.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            requests_sent: self.requests_sent(),
            responses_received: self.responses_received(),
        }
    }
}

/// 某一时刻的计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSnapshot {
    pub requests_sent: u64,
    pub responses_received: u64,
}
