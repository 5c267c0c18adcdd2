//! 上传进度跟踪
//!
//! 把已发送字节数换算为 0-100 的百分比，只向外转发严格递增的值。
//! 传输层若重复或乱序回报，在这里被过滤掉。

use std::sync::Arc;

/// 进度回调（百分比 0-100）
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// 单调进度跟踪器
pub struct ProgressTracker {
    total: u64,
    sent: u64,
    last: Option<u8>,
    callback: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(total: u64, callback: ProgressCallback) -> Self {
        Self {
            total,
            sent: 0,
            last: None,
            callback,
        }
    }

    /// 开始传输：回报 0
    pub fn start(&mut self) {
        self.report(0);
    }

    /// 又发送了 `bytes` 字节
    pub fn advance(&mut self, bytes: u64) {
        self.sent = self.sent.saturating_add(bytes);
        let percent = percent_of(self.sent, self.total);
        // 100 只在确认成功后回报
        self.report(percent.min(99));
    }

    /// 传输成功：回报 100
    pub fn finish(&mut self) {
        self.report(100);
    }

    pub fn last_reported(&self) -> Option<u8> {
        self.last
    }

    fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            (self.callback)(percent);
        }
    }
}

/// 字节数换算百分比，total 为 0 时视为 100
pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (sent.min(total) as u128 * 100 / total as u128) as u8;
    percent.min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording() -> (Arc<Mutex<Vec<u8>>>, ProgressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Arc::new(move |p| sink.lock().push(p)))
    }

    #[test]
    fn reports_are_strictly_increasing() {
        let (seen, callback) = recording();
        let mut tracker = ProgressTracker::new(1000, callback);

        tracker.start();
        tracker.advance(100);
        tracker.advance(0);
        tracker.advance(5);
        tracker.advance(400);
        tracker.advance(495);
        tracker.finish();
        tracker.finish();

        assert_eq!(*seen.lock(), vec![0, 10, 50, 99, 100]);
    }

    #[test]
    fn overshoot_is_clamped() {
        let (seen, callback) = recording();
        let mut tracker = ProgressTracker::new(10, callback);
        tracker.start();
        tracker.advance(50);
        assert_eq!(tracker.last_reported(), Some(99));
        tracker.finish();
        assert!(seen.lock().iter().all(|p| *p <= 100));
    }

    #[test]
    fn percent_of_handles_edges() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(5, 10), 50);
        assert_eq!(percent_of(20, 10), 100);
        assert_eq!(percent_of(u64::MAX / 2, u64::MAX), 49);
    }
}
