use parking_lot::RwLock;

use crate::utils::now_ms;

/// Bucketed counter aggregating request samples over a rolling interval.
///
/// `bucket_count` buckets of `window_size_ms / bucket_count` each. A sample
/// lands in the slot `(now / bucket_size_ms) % bucket_count`; a bucket whose
/// timestamp has fallen out of the window is reset before accumulating, and
/// stale buckets are skipped on aggregation, so a sample contributes to
/// exactly one bucket and is never double counted.
pub struct SlidingWindow {
    window_size_ms: u64,
    bucket_size_ms: u64,
    buckets: RwLock<Vec<Bucket>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    timestamp: u64,
    total_requests: u32,
    failure_count: u32,
    total_response_time_ms: u64,
}

impl Bucket {
    fn reset(&mut self, timestamp: u64) {
        *self = Bucket {
            timestamp,
            ..Default::default()
        };
    }
}

/// Aggregated view over the live buckets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub total_requests: u32,
    pub failure_count: u32,
    pub success_count: u32,
    /// Percentage in [0, 100]
    pub failure_rate: f64,
    pub average_response_time_ms: f64,
}

impl SlidingWindow {
    pub fn new(window_size_ms: u64, bucket_count: usize) -> Self {
        Self {
            window_size_ms,
            bucket_size_ms: window_size_ms / bucket_count as u64,
            buckets: RwLock::new(vec![Bucket::default(); bucket_count]),
        }
    }

    pub fn add_sample(&self, success: bool, response_time_ms: u64) {
        self.add_sample_at(now_ms(), success, response_time_ms)
    }

    pub(crate) fn add_sample_at(&self, now: u64, success: bool, response_time_ms: u64) {
        let mut buckets = self.buckets.write();
        let index = ((now / self.bucket_size_ms) % buckets.len() as u64) as usize;
        let bucket = &mut buckets[index];

        if now.saturating_sub(bucket.timestamp) > self.window_size_ms {
            bucket.reset(now);
        }

        bucket.total_requests += 1;
        if !success {
            bucket.failure_count += 1;
        }
        bucket.total_response_time_ms += response_time_ms;
    }

    pub fn stats(&self) -> WindowStats {
        self.stats_at(now_ms())
    }

    pub(crate) fn stats_at(&self, now: u64) -> WindowStats {
        let buckets = self.buckets.read();

        let mut total_requests: u32 = 0;
        let mut failure_count: u32 = 0;
        let mut total_response_time: u64 = 0;

        for bucket in buckets.iter() {
            if now.saturating_sub(bucket.timestamp) <= self.window_size_ms {
                total_requests += bucket.total_requests;
                failure_count += bucket.failure_count;
                total_response_time += bucket.total_response_time_ms;
            }
        }

        let failure_rate = if total_requests > 0 {
            f64::from(failure_count) / f64::from(total_requests) * 100.0
        } else {
            0.0
        };
        let average_response_time_ms = if total_requests > 0 {
            total_response_time as f64 / f64::from(total_requests)
        } else {
            0.0
        };

        WindowStats {
            total_requests,
            failure_count,
            success_count: total_requests - failure_count,
            failure_rate,
            average_response_time_ms,
        }
    }

    /// Zero every bucket. Zeroed buckets carry timestamp 0 and therefore
    /// read as stale until the next write claims their slot.
    pub fn reset(&self) {
        let mut buckets = self.buckets.write();
        for bucket in buckets.iter_mut() {
            *bucket = Bucket::default();
        }
    }
}
