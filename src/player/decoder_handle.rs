use crate::core::{
    FrameDisposition, PauseState, PlayerError, Result, Timestamp, TrackKind, CC_CHANNELS,
};
use crate::player::log_ctx;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 解码器句柄 - 一条基本流（音频 / 视频 / 字幕）的同步状态
///
/// 所有字段放在同一把锁下：控制线程的修改对解码线程的下一步处理立即可见，
/// 暂停标志和生效时间作为一个 [`PauseState`] 整体替换，不会被读到一半。
///
/// 两类调用者：
/// - 控制 / 输入线程：暂停、延迟、缓冲、隐藏字幕通道、`is_empty`
/// - 解码线程：`block_queued` / `block_taken` / `frame_decoded` / `display_date` / `wait_unpaused`
pub struct DecoderHandle {
    id: u64,
    kind: TrackKind,
    buffering_target: usize,
    state: Mutex<HandleState>,
    cond: Condvar,
}

struct HandleState {
    pause: PauseState,
    pause_offset: Timestamp, // 累计暂停时长，恢复播放后的帧整体后移
    delay: Timestamp,
    buffering: bool,
    buffered: usize, // 缓冲期间扣留的帧数
    full: bool,
    pending_blocks: usize, // 还没被解码线程取走的压缩数据块
    cc_present: [bool; CC_CHANNELS],
    cc_active: [bool; CC_CHANNELS],
    closed: bool,
}

impl DecoderHandle {
    pub(crate) fn new(
        id: u64,
        kind: TrackKind,
        buffering_target: usize,
        pause: PauseState,
    ) -> Self {
        Self {
            id,
            kind,
            buffering_target: buffering_target.max(1),
            state: Mutex::new(HandleState {
                pause,
                pause_offset: 0,
                delay: 0,
                buffering: false,
                buffered: 0,
                full: false,
                pending_blocks: 0,
                cc_present: [false; CC_CHANNELS],
                cc_active: [false; CC_CHANNELS],
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    // ==================== 暂停 ====================

    /// 改变暂停状态
    ///
    /// `date` 必须是切换真正生效的时刻（由时钟提供），音频和视频据此同时暂停。
    /// 从暂停恢复时，暂停持续的时间会加到之后每一帧的显示时间上。
    /// 已经暂停时再次暂停不改变暂停起点。
    pub fn change_pause(&self, paused: bool, date: Timestamp) {
        let mut state = self.state.lock();
        match (state.pause.paused, paused) {
            (true, true) => {}
            (true, false) => {
                state.pause_offset += (date - state.pause.date).max(0);
                state.pause = PauseState { paused, date };
            }
            _ => state.pause = PauseState { paused, date },
        }
        drop(state);
        self.cond.notify_all();
        debug!(
            "{} {} 解码器 #{} {} @ {}",
            log_ctx(),
            self.kind,
            self.id,
            if paused { "⏸️  暂停" } else { "▶️  恢复" },
            date
        );
    }

    /// 当前暂停状态（暂停标志 + 生效时间）
    pub fn pause_state(&self) -> PauseState {
        self.state.lock().pause
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().pause.paused
    }

    /// 解码线程：暂停时阻塞，恢复后返回；句柄关闭时返回 `Cancelled`
    pub fn wait_unpaused(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PlayerError::Cancelled);
            }
            if !state.pause.paused {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    // ==================== 延迟 ====================

    /// 设置本轨道的显示时间偏移（只影响这一条轨道）
    pub fn change_delay(&self, delay: Timestamp) {
        self.state.lock().delay = delay;
        debug!("{} {} 解码器 #{} 延迟: {}us", log_ctx(), self.kind, self.id, delay);
    }

    pub fn delay(&self) -> Timestamp {
        self.state.lock().delay
    }

    /// 一帧的实际显示时间：`ts + 延迟 + 累计暂停时长`，暂停中返回 None
    pub fn display_date(&self, ts: Timestamp) -> Option<Timestamp> {
        let state = self.state.lock();
        if state.pause.paused {
            None
        } else {
            Some(ts + state.delay + state.pause_offset)
        }
    }

    // ==================== 缓冲 ====================

    /// 进入缓冲模式：解码出的帧先留在队列里，不送去显示
    pub fn start_buffering(&self) {
        let mut state = self.state.lock();
        state.buffering = true;
        state.full = false;
        state.buffered = 0;
        debug!("{} 🔄 {} 解码器 #{} 开始缓冲", log_ctx(), self.kind, self.id);
    }

    /// 退出缓冲模式，扣留的帧交给输出，唤醒所有等待者
    pub fn stop_buffering(&self) {
        let mut state = self.state.lock();
        let released = state.buffered;
        state.buffering = false;
        state.buffered = 0;
        drop(state);
        self.cond.notify_all();
        debug!(
            "{} {} 解码器 #{} 停止缓冲，释放 {} 帧",
            log_ctx(),
            self.kind,
            self.id,
            released
        );
    }

    /// 等待缓冲完成（控制线程调用）
    ///
    /// 缓冲已满或已停止时返回 Ok，句柄关闭时返回 `Cancelled`
    pub fn wait_buffering(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PlayerError::Cancelled);
            }
            if !state.buffering || state.full {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// 限时等待缓冲完成，超时返回 `Ok(false)`
    pub fn wait_buffering_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PlayerError::Cancelled);
            }
            if !state.buffering || state.full {
                return Ok(true);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Ok(!state.closed && (!state.buffering || state.full));
            }
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.state.lock().buffering
    }

    /// 缓冲目标是否已达到
    pub fn is_buffering_full(&self) -> bool {
        self.state.lock().full
    }

    /// 解码线程：解码出一帧
    ///
    /// 缓冲中返回 `Withhold`，达到缓冲目标时唤醒 `wait_buffering`
    pub fn frame_decoded(&self) -> FrameDisposition {
        let mut state = self.state.lock();
        if !state.buffering {
            return FrameDisposition::Present;
        }

        state.buffered += 1;
        if !state.full && state.buffered >= self.buffering_target {
            state.full = true;
            drop(state);
            self.cond.notify_all();
            info!(
                "{} ✅ {} 解码器 #{} 缓冲完成（{} 帧）",
                log_ctx(),
                self.kind,
                self.id,
                self.buffering_target
            );
        }
        FrameDisposition::Withhold
    }

    // ==================== 队列 ====================

    /// 输入线程送入一个压缩数据块
    pub fn block_queued(&self) {
        self.state.lock().pending_blocks += 1;
    }

    /// 解码线程取走一个压缩数据块
    pub fn block_taken(&self) {
        let mut state = self.state.lock();
        state.pending_blocks = state.pending_blocks.saturating_sub(1);
    }

    /// 解码队列是否为空（没有待解码的数据块，也没有被缓冲扣留的帧）
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.pending_blocks == 0 && state.buffered == 0
    }

    /// 丢弃队列中的数据块和扣留的帧（Seek 后使用）
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let (blocks, frames) = (state.pending_blocks, state.buffered);
        state.pending_blocks = 0;
        state.buffered = 0;
        state.full = false;
        drop(state);
        if blocks > 0 || frames > 0 {
            info!(
                "{} 🧹 {} 解码器 #{} flush: {} 个数据块, {} 帧",
                log_ctx(),
                self.kind,
                self.id,
                blocks,
                frames
            );
        }
    }

    // ==================== 隐藏字幕 ====================

    /// 解码线程：报告流中存在的隐藏字幕通道，消失的通道自动停止解码
    pub fn set_cc_present(&self, present: [bool; CC_CHANNELS]) {
        let mut state = self.state.lock();
        state.cc_present = present;
        for (active, present) in state.cc_active.iter_mut().zip(present) {
            *active &= present;
        }
    }

    /// 启用 / 停用一个隐藏字幕通道；通道不存在时返回 `InvalidChannel`，状态不变
    pub fn set_cc_state(&self, decode: bool, channel: usize) -> Result<()> {
        let mut state = self.state.lock();
        if channel >= CC_CHANNELS || !state.cc_present[channel] {
            return Err(PlayerError::InvalidChannel(channel));
        }
        state.cc_active[channel] = decode;
        drop(state);
        info!(
            "{} 📝 {} 解码器 #{} 隐藏字幕通道 {} {}",
            log_ctx(),
            self.kind,
            self.id,
            channel,
            if decode { "启用" } else { "停用" }
        );
        Ok(())
    }

    /// 通道是否正在解码；通道不存在时返回 `InvalidChannel`
    pub fn get_cc_state(&self, channel: usize) -> Result<bool> {
        let state = self.state.lock();
        if channel >= CC_CHANNELS || !state.cc_present[channel] {
            return Err(PlayerError::InvalidChannel(channel));
        }
        Ok(state.cc_active[channel])
    }

    /// 流中存在哪些隐藏字幕通道（与是否在解码无关）
    pub fn is_cc_present(&self) -> [bool; CC_CHANNELS] {
        self.state.lock().cc_present
    }

    // ==================== 生命周期 ====================

    /// 关闭句柄，唤醒所有等待者（返回 `Cancelled`）
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.cond.notify_all();
        debug!("{} {} 解码器 #{} 已关闭", log_ctx(), self.kind, self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Arc;
    use std::thread;

    fn handle(kind: TrackKind) -> Arc<DecoderHandle> {
        Arc::new(DecoderHandle::new(1, kind, 2, PauseState::PLAYING))
    }

    #[test]
    fn test_display_date_applies_delay_and_pause() {
        let h = handle(TrackKind::Audio);
        h.change_delay(500);
        assert_eq!(h.display_date(10_000), Some(10_500));

        h.change_pause(true, 1_000);
        assert_eq!(h.display_date(10_000), None);
        assert_eq!(h.pause_state(), PauseState { paused: true, date: 1_000 });

        h.change_pause(false, 3_000);
        assert_eq!(h.display_date(10_000), Some(12_500));
    }

    #[test]
    fn test_repeated_pause_keeps_start_date() {
        let h = handle(TrackKind::Video);
        h.change_pause(true, 100);
        h.change_pause(true, 200);
        assert_eq!(h.pause_state(), PauseState { paused: true, date: 100 });

        h.change_pause(false, 300);
        assert_eq!(h.display_date(0), Some(200));
    }

    #[test]
    fn test_flush_during_buffering_resets_progress() {
        let h = handle(TrackKind::Video);
        h.start_buffering();
        h.block_queued();
        h.frame_decoded();
        h.frame_decoded();
        assert!(h.is_buffering_full());
        assert!(!h.is_empty());

        h.flush();
        assert!(h.is_empty());
        assert!(h.is_buffering());
        assert!(!h.is_buffering_full());

        // flush 之后要重新攒够目标帧数
        assert_eq!(h.frame_decoded(), FrameDisposition::Withhold);
        assert!(!h.is_buffering_full());
        assert!(!h.wait_buffering_for(Duration::from_millis(10)).unwrap());
        h.frame_decoded();
        assert!(h.is_buffering_full());
    }

    #[test]
    fn test_buffering_withholds_until_target() {
        let h = handle(TrackKind::Video);
        assert_eq!(h.frame_decoded(), FrameDisposition::Present);

        h.start_buffering();
        assert_eq!(h.frame_decoded(), FrameDisposition::Withhold);
        assert!(!h.is_buffering_full());
        assert!(!h.is_empty());
        assert_eq!(h.frame_decoded(), FrameDisposition::Withhold);
        assert!(h.is_buffering_full());
        assert!(h.wait_buffering().is_ok());

        h.stop_buffering();
        assert!(h.is_empty());
        assert_eq!(h.frame_decoded(), FrameDisposition::Present);
    }

    #[test]
    fn test_wait_buffering_released_by_frames() {
        let h = handle(TrackKind::Video);
        h.start_buffering();

        let (tx, rx) = bounded(1);
        let waiter = {
            let h = h.clone();
            thread::spawn(move || tx.send(h.wait_buffering()).unwrap())
        };

        h.frame_decoded();
        h.frame_decoded();
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(result.is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_buffering_released_by_stop() {
        let h = handle(TrackKind::Audio);
        h.start_buffering();

        let (tx, rx) = bounded(1);
        let waiter = {
            let h = h.clone();
            thread::spawn(move || tx.send(h.wait_buffering()).unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        h.stop_buffering();
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_close_cancels_waiters() {
        let h = handle(TrackKind::Video);
        h.start_buffering();
        h.change_pause(true, 10);

        let (tx, rx) = bounded(2);
        let waiters: Vec<_> = (0..2)
            .map(|i| {
                let h = h.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    let result = if i == 0 { h.wait_buffering() } else { h.wait_unpaused() };
                    tx.send(result).unwrap();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        h.close();
        for _ in 0..2 {
            let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert!(matches!(result, Err(PlayerError::Cancelled)));
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_wait_buffering_for_times_out() {
        let h = handle(TrackKind::Video);
        h.start_buffering();
        assert!(!h.wait_buffering_for(Duration::from_millis(20)).unwrap());
        h.frame_decoded();
        h.frame_decoded();
        assert!(h.wait_buffering_for(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_wait_unpaused() {
        let h = handle(TrackKind::Video);
        assert!(h.wait_unpaused().is_ok());
        h.change_pause(true, 100);

        let waiter = {
            let h = h.clone();
            thread::spawn(move || h.wait_unpaused())
        };
        thread::sleep(Duration::from_millis(20));
        h.change_pause(false, 200);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_is_empty_tracks_blocks() {
        let h = handle(TrackKind::Audio);
        assert!(h.is_empty());
        h.block_queued();
        h.block_queued();
        assert!(!h.is_empty());
        h.block_taken();
        assert!(!h.is_empty());
        h.block_taken();
        assert!(h.is_empty());

        h.block_queued();
        h.flush();
        assert!(h.is_empty());
    }

    #[test]
    fn test_cc_channels() {
        let h = handle(TrackKind::Video);
        for channel in 0..CC_CHANNELS {
            assert!(matches!(
                h.set_cc_state(true, channel),
                Err(PlayerError::InvalidChannel(c)) if c == channel
            ));
            assert!(matches!(h.get_cc_state(channel), Err(PlayerError::InvalidChannel(_))));
        }

        h.set_cc_present([true, false, true, false]);
        assert_eq!(h.is_cc_present(), [true, false, true, false]);
        assert!(!h.get_cc_state(0).unwrap());
        h.set_cc_state(true, 0).unwrap();
        h.set_cc_state(true, 2).unwrap();
        assert!(h.get_cc_state(0).unwrap());
        assert!(h.set_cc_state(true, 1).is_err());
        assert!(h.set_cc_state(true, 4).is_err());
        assert!(h.get_cc_state(7).is_err());

        // 通道 2 消失：自动停用
        h.set_cc_present([true, true, false, false]);
        assert!(h.get_cc_state(0).unwrap());
        assert!(!h.get_cc_state(1).unwrap());
        assert!(h.get_cc_state(2).is_err());
    }
}
