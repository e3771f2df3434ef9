use crate::core::{PauseState, PlayerError, Result, SyncConfig, Timestamp, TrackKind};
use crate::player::decoder_handle::DecoderHandle;
use crate::player::log_ctx;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 解码器同步控制器 - 协调一个输入会话中所有活动的解码器句柄
///
/// # 音画同步机制
/// - 暂停 / 恢复：带生效时间广播到每个句柄，`change_pause` 返回前所有句柄都已更新
/// - 新建的句柄继承会话当前的暂停状态
/// - 缓冲：Seek / 启动前对所有轨道开始缓冲，控制线程等待全部轨道达到缓冲目标
///
/// # 加锁顺序
/// 控制器锁 → 句柄锁。句柄从不反过来获取控制器锁。
///
/// # 取消
/// `close()`（或 drop）是唯一的取消信号：关闭所有句柄，阻塞在
/// `wait_buffering` / `wait_unpaused` 的线程立即返回 `Cancelled`。
pub struct DecoderSyncController {
    config: SyncConfig,
    inner: Mutex<ControllerInner>,
    next_id: AtomicU64,
}

struct ControllerInner {
    decoders: Vec<Arc<DecoderHandle>>,
    pause: PauseState,
    closed: bool,
}

impl DecoderSyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(ControllerInner {
                decoders: Vec::new(),
                pause: PauseState::PLAYING,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// 解码线程启动时创建句柄
    pub fn create_decoder(&self, kind: TrackKind) -> Result<Arc<DecoderHandle>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PlayerError::Destroyed("解码器同步控制器"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let target = self.config.buffering.target_for(kind);
        let handle = Arc::new(DecoderHandle::new(id, kind, target, inner.pause));
        inner.decoders.push(handle.clone());
        info!(
            "{} 🎬 创建{}解码器 #{}（缓冲目标 {} 帧，当前 {} 个解码器）",
            log_ctx(),
            kind,
            id,
            target,
            inner.decoders.len()
        );
        Ok(handle)
    }

    /// 解码线程结束时移除句柄
    pub fn remove_decoder(&self, handle: &DecoderHandle) {
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.decoders.len();
            inner.decoders.retain(|d| d.id() != handle.id());
            before != inner.decoders.len()
        };
        handle.close();
        if removed {
            info!("{} 🛑 移除{}解码器 #{}", log_ctx(), handle.kind(), handle.id());
        }
    }

    /// 当前活动的句柄
    pub fn decoders(&self) -> Vec<Arc<DecoderHandle>> {
        self.inner.lock().decoders.clone()
    }

    /// 会话的暂停状态
    pub fn pause_state(&self) -> PauseState {
        self.inner.lock().pause
    }

    /// 广播暂停状态到所有句柄
    ///
    /// `date` 是切换生效的精确时刻（由时钟提供），所有轨道在同一时刻暂停 / 恢复。
    pub fn change_pause(&self, paused: bool, date: Timestamp) {
        let mut inner = self.inner.lock();
        if !(inner.pause.paused && paused) {
            inner.pause = PauseState { paused, date };
        }
        for decoder in &inner.decoders {
            decoder.change_pause(paused, date);
        }
        info!(
            "{} {} @ {}（{} 个解码器）",
            log_ctx(),
            if paused { "⏸️  暂停" } else { "▶️  恢复播放" },
            date,
            inner.decoders.len()
        );
    }

    /// 所有轨道开始缓冲（启动 / Seek 前）
    pub fn start_buffering_all(&self) {
        let inner = self.inner.lock();
        for decoder in &inner.decoders {
            decoder.start_buffering();
        }
        info!("{} 🔄 开始缓冲（{} 个解码器）", log_ctx(), inner.decoders.len());
    }

    /// 所有轨道停止缓冲
    pub fn stop_buffering_all(&self) {
        let inner = self.inner.lock();
        for decoder in &inner.decoders {
            decoder.stop_buffering();
        }
        info!("{} ✅ 停止缓冲（{} 个解码器）", log_ctx(), inner.decoders.len());
    }

    /// 等待所有轨道缓冲完成；控制器关闭时返回 `Cancelled`
    pub fn wait_buffering_all(&self) -> Result<()> {
        // 等待期间不持有控制器锁，close() 才能进来取消
        let decoders = {
            let inner = self.inner.lock();
            if inner.closed {
                return Err(PlayerError::Cancelled);
            }
            inner.decoders.clone()
        };
        for decoder in &decoders {
            if let Err(e) = decoder.wait_buffering() {
                warn!("{} ⚠️  {} 解码器 #{} 等待缓冲被取消", log_ctx(), decoder.kind(), decoder.id());
                return Err(e);
            }
        }
        debug!("{} 所有解码器缓冲完成", log_ctx());
        Ok(())
    }

    /// 所有轨道的解码队列是否都为空（用于判断 EOF 时是否已排空）
    pub fn is_empty_all(&self) -> bool {
        self.inner.lock().decoders.iter().all(|d| d.is_empty())
    }

    /// 关闭控制器：取消所有等待，之后不能再创建句柄
    pub fn close(&self) {
        let decoders = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.decoders)
        };
        for decoder in &decoders {
            decoder.close();
        }
        info!("{} ✅ 解码器同步控制器已关闭（{} 个解码器）", log_ctx(), decoders.len());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for DecoderSyncController {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl Drop for DecoderSyncController {
    fn drop(&mut self) {
        self.close();
    }
}
