//! 证据通道熔断器
//!
//! 连续失败达到阈值后打开，冷却期内直接跳过外部解析调用；
//! 冷却期结束后放行一次试探调用，成功即关闭，失败重新打开。

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

const CLOSED: i64 = i64::MIN;

/// 熔断策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// 连续失败次数阈值，1 表示首次失败即熔断
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// 放行凭证
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// 半开试探：`previous` 为原打开时刻，`claimed` 为占用时写入的时刻
    Trial { previous: i64, claimed: i64 },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    consecutive_failures: AtomicU32,
    /// 打开时刻 (毫秒)，CLOSED 表示关闭
    opened_at_ms: AtomicI64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy: BreakerPolicy {
                failure_threshold: policy.failure_threshold.max(1),
                cool_down: policy.cool_down,
            },
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicI64::new(CLOSED),
            trips: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    fn cool_down_ms(&self) -> i64 {
        i64::try_from(self.policy.cool_down.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        if opened == CLOSED {
            BreakerState::Closed
        } else if now.timestamp_millis().saturating_sub(opened) < self.cool_down_ms() {
            BreakerState::Open
        } else {
            BreakerState::HalfOpen
        }
    }

    /// 申请调用外部依赖，拒绝时返回 None
    ///
    /// 半开状态下只有抢到 CAS 的调用方获得试探机会，其余调用方看到的仍是打开状态。
    /// 拿到试探机会但最终没有调用外部依赖时，必须交回 `release`。
    pub fn admit(&self, now: DateTime<Utc>) -> Option<Admission> {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        if opened == CLOSED {
            return Some(Admission::Closed);
        }
        let now_ms = now.timestamp_millis();
        if now_ms.saturating_sub(opened) < self.cool_down_ms() {
            return None;
        }
        self.opened_at_ms
            .compare_exchange(opened, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|previous| Admission::Trial {
                previous,
                claimed: now_ms,
            })
    }

    /// 交回未使用的试探机会，熔断器回到占用前的半开状态
    pub fn release(&self, admission: Admission) {
        if let Admission::Trial { previous, claimed } = admission {
            let _ = self.opened_at_ms.compare_exchange(
                claimed,
                previous,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let previous = self.opened_at_ms.swap(CLOSED, Ordering::AcqRel);
        if previous != CLOSED {
            tracing::info!("[Breaker] evidence path recovered, circuit closed");
        }
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.policy.failure_threshold {
            self.opened_at_ms.store(now.timestamp_millis(), Ordering::Release);
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "[Breaker] evidence path suspended after {} consecutive failures, cool-down {:?}",
                failures,
                self.policy.cool_down
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// 累计熔断次数
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}
