use chrono::{DateTime, Datelike, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// 按自然日 (UTC) 计的外部引擎用量预算
///
/// 日期 (高 32 位) 与当日用量 (低 32 位) 打包在同一个原子量里，
/// 跨日清零与计数在一次 CAS 中完成。
#[derive(Debug)]
pub struct DailyBudget {
    /// 0 表示不限
    limit: u64,
    state: AtomicU64,
}

fn pack(day: u32, used: u32) -> u64 {
    (u64::from(day) << 32) | u64::from(used)
}

fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

impl DailyBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            state: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    fn day_of(now: DateTime<Utc>) -> u32 {
        u32::try_from(now.date_naive().num_days_from_ce()).unwrap_or(0)
    }

    /// 尝试占用 `units`，超出预算时返回 false 且不计数
    pub fn try_consume(&self, units: u64, now: DateTime<Utc>) -> bool {
        let today = Self::day_of(now);
        let units = u32::try_from(units).unwrap_or(u32::MAX);
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (day, used) = unpack(current);
            let used = if day == today { used } else { 0 };
            let next = used.saturating_add(units);
            if self.limit > 0 && u64::from(next) > self.limit {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                pack(today, next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self, now: DateTime<Utc>) -> u64 {
        let (day, used) = unpack(self.state.load(Ordering::Acquire));
        if day != Self::day_of(now) {
            return 0;
        }
        u64::from(used)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exhausts_within_a_day() {
        let b = DailyBudget::new(2);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert!(b.try_consume(1, now));
        assert!(b.try_consume(1, now));
        assert!(!b.try_consume(1, now));
        assert_eq!(b.used(now), 2);
    }

    #[test]
    fn resets_on_day_boundary() {
        let b = DailyBudget::new(1);
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();
        assert!(b.try_consume(1, late));
        assert!(!b.try_consume(1, late));
        assert_eq!(b.used(next), 0);
        assert!(b.try_consume(1, next));
    }

    #[test]
    fn unlimited_never_refuses() {
        let b = DailyBudget::unlimited();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        for _ in 0..1000 {
            assert!(b.try_consume(1, now));
        }
        assert_eq!(b.used(now), 1000);
    }

    #[test]
    fn concurrent_consumers_across_midnight_are_all_counted() {
        let budget = std::sync::Arc::new(DailyBudget::unlimited());
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();
        assert!(budget.try_consume(5, late));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = std::sync::Arc::clone(&budget);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(budget.try_consume(1, next));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(budget.used(next), 800);
    }

    #[test]
    fn limit_applies_to_new_day_only() {
        let b = DailyBudget::new(3);
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        assert!(b.try_consume(3, late));
        assert!(b.try_consume(2, next));
        assert!(!b.try_consume(2, next));
        assert!(b.try_consume(1, next));
        assert_eq!(b.used(next), 3);
    }
}
