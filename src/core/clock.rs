use crate::core::Timestamp;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 为暂停 / 恢复提供精确的生效时间
///
/// `now()` 是单调递增的墙上时间（微秒，从时钟创建开始计）。
/// `pause()` / `play()` 返回切换发生的那一刻，调用者把它交给
/// `DecoderSyncController::change_pause`，保证所有轨道在同一时刻暂停。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    origin: Instant, // 时钟起点
    base_pts: Timestamp, // 基准媒体时间（微秒）
    base_date: Timestamp, // 基准墙上时间
    paused: bool,
    paused_at: Timestamp, // 暂停时的媒体位置
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                origin: Instant::now(),
                base_pts: 0,
                base_date: 0,
                paused: true,
                paused_at: 0,
            })),
        }
    }

    /// 当前墙上时间（微秒）
    pub fn now(&self) -> Timestamp {
        Self::now_unlocked(&self.inner.lock())
    }

    /// 当前媒体位置（微秒）
    pub fn position(&self) -> Timestamp {
        let inner = self.inner.lock();
        Self::position_unlocked(&inner, Self::now_unlocked(&inner))
    }

    /// 设置播放位置
    pub fn set_time(&self, pts: Timestamp) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_date = Self::now_unlocked(&inner);
        inner.paused_at = pts;
    }

    /// 开始播放，返回生效时间
    pub fn play(&self) -> Timestamp {
        let mut inner = self.inner.lock();
        let date = Self::now_unlocked(&inner);
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_date = date;
            inner.paused = false;
        }
        date
    }

    /// 暂停播放，返回生效时间
    pub fn pause(&self) -> Timestamp {
        let mut inner = self.inner.lock();
        let date = Self::now_unlocked(&inner);
        if !inner.paused {
            inner.paused_at = Self::position_unlocked(&inner, date);
            inner.paused = true;
        }
        date
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> Timestamp {
        inner.origin.elapsed().as_micros() as Timestamp
    }

    fn position_unlocked(inner: &ClockInner, date: Timestamp) -> Timestamp {
        if inner.paused {
            inner.paused_at
        } else {
            inner.base_pts + (date - inner.base_date)
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pause_returns_increasing_dates() {
        let clock = PlaybackClock::new();
        let started = clock.play();
        thread::sleep(Duration::from_millis(5));
        let paused = clock.pause();
        assert!(paused > started);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_position_advances_while_playing() {
        let clock = PlaybackClock::new();
        clock.set_time(500_000);
        let started = clock.play();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now() >= started + 5_000);
        assert!(clock.position() >= 505_000);
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let clock = PlaybackClock::new();
        clock.set_time(1_000_000);
        let pos = clock.position();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.position(), pos);
        assert_eq!(pos, 1_000_000);
    }
}
