//! 固定桶的耗时直方图

use std::time::Duration;

use serde::Serialize;

/// 桶上界（毫秒，含）；最后一个桶收容超出最大上界的样本
pub const BUCKET_BOUNDS_MS: [u64; 10] = [1, 5, 10, 50, 100, 500, 1_000, 5_000, 30_000, 120_000];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationHistogram {
    counts: Vec<u64>,
    count: u64,
    sum_ms: u64,
    max_ms: u64,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; BUCKET_BOUNDS_MS.len() + 1],
            count: 0,
            sum_ms: 0,
            max_ms: 0,
        }
    }
}

impl DurationHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, d: Duration) {
        let ms = d.as_millis().min(u64::MAX as u128) as u64;
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.counts[idx] = self.counts[idx].saturating_add(1);
        self.count = self.count.saturating_add(1);
        self.sum_ms = self.sum_ms.saturating_add(ms);
        self.max_ms = self.max_ms.max(ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum_ms(&self) -> u64 {
        self.sum_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }

    /// (桶上界, 计数)；上界 None 表示溢出桶
    pub fn buckets(&self) -> Vec<(Option<u64>, u64)> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &c)| (BUCKET_BOUNDS_MS.get(i).copied(), c))
            .collect()
    }

    /// 分位数所在桶的上界（近似值）；溢出桶返回观测到的最大值
    pub fn quantile_upper_ms(&self, q: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let rank = ((q.clamp(0.0, 1.0) * self.count as f64).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (i, &c) in self.counts.iter().enumerate() {
            seen += c;
            if seen >= rank {
                return Some(BUCKET_BOUNDS_MS.get(i).copied().unwrap_or(self.max_ms));
            }
        }
        Some(self.max_ms)
    }
}
