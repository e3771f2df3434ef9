use crate::core::{OutputKind, VideoFormat};
use crate::player::device::OutputDevice;
use crate::player::log_ctx;
use log::{error, info};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// 槽位最后一次已知的格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotFormat {
    Audio,
    Video(VideoFormat),
    /// 流输出的目的地字符串
    StreamOutput(String),
}

/// 输出槽位 - 一个具体输出设备的引用计数句柄
///
/// # 生命周期
/// - 在资源管理器的槽位表中：引用计数为 0 时视为"停放待用"
/// - 被移出槽位表（retire）后：引用计数归零的那一刻关闭设备
/// - 强制关闭（管理器销毁）：不管还有多少引用，立即关闭设备
///
/// 设备最多关闭一次。
pub struct OutputSlot {
    id: u64,
    kind: OutputKind,
    device: Arc<dyn OutputDevice>,
    refs: AtomicUsize,
    retired: AtomicBool,
    closed: AtomicBool,
    format: Mutex<SlotFormat>,
}

impl OutputSlot {
    pub(crate) fn new(id: u64, device: Arc<dyn OutputDevice>, format: SlotFormat) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind: device.kind(),
            device,
            refs: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            format: Mutex::new(format),
        })
    }

    /// 槽位编号（管理器内唯一）
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// 底层设备
    pub fn device(&self) -> &Arc<dyn OutputDevice> {
        &self.device
    }

    /// 设备原生句柄
    pub fn native_id(&self) -> u64 {
        self.device.native_id()
    }

    /// 当前外部引用数
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// 是否已被移出槽位表
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// 设备是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 最后一次已知的格式
    pub fn format(&self) -> SlotFormat {
        self.format.lock().clone()
    }

    /// 视频格式（非视频槽位返回 None）
    pub fn video_format(&self) -> Option<VideoFormat> {
        match &*self.format.lock() {
            SlotFormat::Video(format) => Some(*format),
            _ => None,
        }
    }

    pub(crate) fn set_format(&self, format: SlotFormat) {
        *self.format.lock() = format;
    }

    /// 增加一个引用
    pub(crate) fn acquire(self: &Arc<Self>) -> SlotRef {
        self.refs.fetch_add(1, Ordering::SeqCst);
        SlotRef {
            slot: Arc::clone(self),
        }
    }

    fn release_ref(&self) {
        match self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => {
                if self.retired.load(Ordering::SeqCst) {
                    self.close_device("最后一个引用已释放");
                }
            }
            Ok(_) => {}
            Err(_) => {
                error!("{} ❌ 槽位 #{} 引用计数已为 0，忽略多余的释放", log_ctx(), self.id);
            }
        }
    }

    /// 移出槽位表：没有引用时立即关闭，否则等最后一个引用释放
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if self.refs.load(Ordering::SeqCst) == 0 {
            self.close_device("已移出槽位表");
        }
    }

    /// 强制关闭（不管外部引用）
    pub(crate) fn force_close(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.close_device("强制关闭");
    }

    fn close_device(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.device.close();
            info!(
                "{} 🗑️  关闭{} 槽位 #{} ({}): {}",
                log_ctx(),
                self.kind,
                self.id,
                self.device.description(),
                reason
            );
        }
    }
}

impl fmt::Debug for OutputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSlot")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("native_id", &self.native_id())
            .field("refs", &self.ref_count())
            .field("retired", &self.is_retired())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 计数借用 - `Hold*` / `Request*` 返回给调用者的引用
///
/// 释放方式：调用 [`SlotRef::release`] 或直接 drop，每个引用恰好释放一次。
/// 不实现 `Clone`，新的引用只能通过资源管理器获取。
pub struct SlotRef {
    slot: Arc<OutputSlot>,
}

impl SlotRef {
    /// 归还引用
    pub fn release(self) {}

    pub(crate) fn shared(&self) -> &Arc<OutputSlot> {
        &self.slot
    }
}

impl Deref for SlotRef {
    type Target = OutputSlot;

    fn deref(&self) -> &OutputSlot {
        &self.slot
    }
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        self.slot.release_ref();
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotRef").field(&*self.slot).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::device::NullDevice;

    fn audio_slot() -> (Arc<OutputSlot>, Arc<NullDevice>) {
        let device = Arc::new(NullDevice::new(OutputKind::Audio, "test"));
        let slot = OutputSlot::new(1, device.clone(), SlotFormat::Audio);
        (slot, device)
    }

    #[test]
    fn test_hold_release_restores_count() {
        let (slot, device) = audio_slot();
        let a = slot.acquire();
        let b = slot.acquire();
        assert_eq!(slot.ref_count(), 2);
        b.release();
        assert_eq!(slot.ref_count(), 1);
        drop(a);
        assert_eq!(slot.ref_count(), 0);
        // 仍在槽位表中：停放待用，不关闭
        assert!(!device.is_closed());
    }

    #[test]
    fn test_retired_slot_closes_on_last_release() {
        let (slot, device) = audio_slot();
        let a = slot.acquire();
        slot.retire();
        assert!(!device.is_closed());
        a.release();
        assert!(device.is_closed());
        assert!(slot.is_closed());
    }

    #[test]
    fn test_force_close_ignores_references() {
        let (slot, device) = audio_slot();
        let a = slot.acquire();
        slot.force_close();
        assert!(device.is_closed());
        // 之后释放引用不会再关闭一次，也不会下溢
        drop(a);
        assert_eq!(slot.ref_count(), 0);
    }

    #[test]
    fn test_release_never_goes_negative() {
        let (slot, _device) = audio_slot();
        slot.release_ref();
        assert_eq!(slot.ref_count(), 0);
    }
}
