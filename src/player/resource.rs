use crate::core::{OutputKind, PlayerError, ResourceConfig, Result, VideoFormat, VideoKey};
use crate::player::device::{DeviceFactory, OutputDevice};
use crate::player::log_ctx;
use crate::player::slot::{OutputSlot, SlotFormat, SlotRef};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 资源管理器 - 持有并回收一个输入会话使用的输出设备
///
/// # 槽位表
/// - 最多一个音频输出、一个流输出
/// - 多个视频输出，按 [`VideoKey`] 区分，不重复
/// - 最多一个"停放"的视频输出（被释放但保留待用，窗口已隐藏）
///
/// # 加锁规则
/// - `inner`：槽位表锁，只在更新表和引用计数时持有
/// - `create_lock`：设备创建串行化，避免两个线程同时为同一个槽位创建设备；
///   创建设备时不持有 `inner`，`Hold*` 不会被慢速的设备创建阻塞
/// - 加锁顺序固定为 `create_lock` → `inner`
///
/// # 失败语义
/// 新设备创建成功之后才会替换旧槽位，创建失败时槽位表保持不变。
/// 传入的 `existing` 引用总是被消耗（复用时原样返回）。
pub struct ResourceManager {
    factory: Arc<dyn DeviceFactory>,
    config: ResourceConfig,
    inner: Mutex<ResourceInner>,
    create_lock: Mutex<()>,
    next_slot_id: AtomicU64,
}

#[derive(Default)]
struct ResourceInner {
    input: Option<String>,
    audio: Option<Arc<OutputSlot>>,
    videos: Vec<(VideoKey, Arc<OutputSlot>)>,
    parked_video: Option<Arc<OutputSlot>>,
    stream_output: Option<Arc<OutputSlot>>,
    destroyed: bool,
}

impl ResourceInner {
    fn video_index(&self, slot_id: u64) -> Option<usize> {
        self.videos.iter().position(|(_, slot)| slot.id() == slot_id)
    }

    /// 登记到 `key` 下，返回被挤掉的旧槽位
    fn insert_video(&mut self, key: VideoKey, slot: Arc<OutputSlot>) -> Option<Arc<OutputSlot>> {
        if let Some(index) = self.video_index(slot.id()) {
            self.videos.remove(index);
        }
        match self.videos.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, slot)),
            None => {
                self.videos.push((key, slot));
                None
            }
        }
    }
}

/// 单例槽位（音频 / 流输出）
#[derive(Debug, Clone, Copy)]
enum SingleSlot {
    Audio,
    StreamOutput,
}

impl SingleSlot {
    fn kind(self) -> OutputKind {
        match self {
            SingleSlot::Audio => OutputKind::Audio,
            SingleSlot::StreamOutput => OutputKind::StreamOutput,
        }
    }

    fn get(self, inner: &ResourceInner) -> Option<&Arc<OutputSlot>> {
        match self {
            SingleSlot::Audio => inner.audio.as_ref(),
            SingleSlot::StreamOutput => inner.stream_output.as_ref(),
        }
    }

    fn get_mut(self, inner: &mut ResourceInner) -> &mut Option<Arc<OutputSlot>> {
        match self {
            SingleSlot::Audio => &mut inner.audio,
            SingleSlot::StreamOutput => &mut inner.stream_output,
        }
    }
}

impl ResourceManager {
    /// 创建空的资源管理器
    pub fn new(factory: Arc<dyn DeviceFactory>, config: ResourceConfig) -> Self {
        info!("{} 🎛️  创建资源管理器（视频回收: {}）", log_ctx(), config.recycle_video);
        Self {
            factory,
            config,
            inner: Mutex::new(ResourceInner::default()),
            create_lock: Mutex::new(()),
            next_slot_id: AtomicU64::new(1),
        }
    }

    /// 使用默认配置创建
    pub fn with_factory(factory: Arc<dyn DeviceFactory>) -> Self {
        Self::new(factory, ResourceConfig::default())
    }

    /// 关联输入会话（None 表示与当前输入分离），不影响已持有的槽位
    pub fn set_input(&self, input: Option<String>) {
        let mut inner = self.inner.lock();
        match (&inner.input, &input) {
            (_, Some(name)) => info!("{} 📎 资源管理器关联输入: {}", log_ctx(), name),
            (Some(old), None) => info!("{} 📎 资源管理器与输入分离: {}", log_ctx(), old),
            (None, None) => {}
        }
        inner.input = input;
    }

    /// 当前关联的输入
    pub fn input(&self) -> Option<String> {
        self.inner.lock().input.clone()
    }

    /// 请求流输出
    ///
    /// 当前流输出的目的地相同则复用（引用计数 +1），不同则创建新的复用器并释放旧的。
    pub fn request_stream_output(
        &self,
        existing: Option<SlotRef>,
        destination: &str,
    ) -> Result<SlotRef> {
        self.request_single(
            SingleSlot::StreamOutput,
            existing,
            SlotFormat::StreamOutput(destination.to_string()),
            |factory| factory.create_stream_output(destination),
        )
    }

    /// 请求音频输出
    ///
    /// 已有音频输出时总是复用，切换轨道 / 文件时不重新初始化声卡。
    pub fn request_audio_output(&self, existing: Option<SlotRef>) -> Result<SlotRef> {
        self.request_single(SingleSlot::Audio, existing, SlotFormat::Audio, |factory| {
            factory.create_audio()
        })
    }

    /// 请求视频输出
    ///
    /// - `format` 为 None：释放 `existing`。`recycle` 时隐藏并停放，供下一次请求复用；
    ///   否则在最后一个引用释放时关闭。返回 `Ok(None)`。
    /// - `format` 为 Some：候选输出依次为 `existing`、`key` 下已有的输出、停放的输出。
    ///   `recycle` 且格式兼容（见 [`RecyclePolicy`](crate::core::RecyclePolicy)）时只重新配置，
    ///   否则创建新输出并释放旧的。
    pub fn request_video_output(
        &self,
        key: VideoKey,
        existing: Option<SlotRef>,
        format: Option<&VideoFormat>,
        recycle: bool,
    ) -> Result<Option<SlotRef>> {
        let recycle = recycle && self.config.recycle_video;
        match format {
            None => {
                if let Some(existing) = existing {
                    self.release_video_output(existing, recycle);
                }
                Ok(None)
            }
            Some(format) => self.acquire_video_output(key, existing, format, recycle).map(Some),
        }
    }

    /// 获取当前音频输出（没有则返回 None）
    pub fn hold_audio_output(&self) -> Option<SlotRef> {
        let inner = self.inner.lock();
        inner.audio.as_ref().map(|slot| slot.acquire())
    }

    /// 获取第一个视频输出（没有则返回 None）
    pub fn hold_video_output(&self) -> Option<SlotRef> {
        let inner = self.inner.lock();
        inner.videos.first().map(|(_, slot)| slot.acquire())
    }

    /// 获取所有视频输出，数量即 `len()`，每个引用都要释放
    pub fn hold_all_video_outputs(&self) -> Vec<SlotRef> {
        let inner = self.inner.lock();
        inner.videos.iter().map(|(_, slot)| slot.acquire()).collect()
    }

    /// 获取当前流输出（没有则返回 None）
    pub fn hold_stream_output(&self) -> Option<SlotRef> {
        let inner = self.inner.lock();
        inner.stream_output.as_ref().map(|slot| slot.acquire())
    }

    /// 是否有活动的视频输出
    pub fn has_video_output(&self) -> bool {
        !self.inner.lock().videos.is_empty()
    }

    /// 关闭所有视频输出（包括停放的），仍被引用的在最后一个引用释放时关闭
    pub fn terminate_video_outputs(&self) {
        let (videos, parked) = {
            let mut inner = self.inner.lock();
            (std::mem::take(&mut inner.videos), inner.parked_video.take())
        };
        let count = videos.len() + parked.is_some() as usize;
        for (_, slot) in videos {
            slot.retire();
        }
        if let Some(slot) = parked {
            slot.retire();
        }
        if count > 0 {
            info!("{} ⏹️  已终止 {} 个视频输出", log_ctx(), count);
        }
    }

    /// 关闭流输出
    pub fn terminate_stream_output(&self) {
        let stream_output = self.inner.lock().stream_output.take();
        if let Some(slot) = stream_output {
            slot.retire();
            info!("{} ⏹️  已终止流输出", log_ctx());
        }
    }

    /// 销毁：不管外部是否还有引用，关闭所有设备
    ///
    /// 销毁后 `Request*` 返回 [`PlayerError::Destroyed`]，`Hold*` 返回 None。
    /// 外部在销毁后继续使用设备属于调用者的编程错误。
    pub fn destroy(&self) {
        let slots: Vec<Arc<OutputSlot>> = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.input = None;

            let mut slots: Vec<Arc<OutputSlot>> = Vec::new();
            slots.extend(inner.audio.take());
            slots.extend(inner.videos.drain(..).map(|(_, slot)| slot));
            slots.extend(inner.parked_video.take());
            slots.extend(inner.stream_output.take());
            slots
        };

        for slot in &slots {
            if slot.ref_count() > 0 {
                warn!(
                    "{} ⚠️  {} 槽位 #{} 仍有 {} 个引用，强制关闭",
                    log_ctx(),
                    slot.kind(),
                    slot.id(),
                    slot.ref_count()
                );
            }
            slot.force_close();
        }
        info!("{} ✅ 资源管理器已销毁，关闭 {} 个输出", log_ctx(), slots.len());
    }

    fn lock_alive(&self) -> Result<MutexGuard<'_, ResourceInner>> {
        let inner = self.inner.lock();
        if inner.destroyed {
            return Err(PlayerError::Destroyed("资源管理器"));
        }
        Ok(inner)
    }

    fn next_slot_id(&self) -> u64 {
        self.next_slot_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 调用工厂创建设备（不持有槽位表锁）
    fn create_device(
        &self,
        kind: OutputKind,
        create: impl FnOnce(&dyn DeviceFactory) -> anyhow::Result<Arc<dyn OutputDevice>>,
    ) -> Result<Arc<dyn OutputDevice>> {
        create(&*self.factory).map_err(|e| {
            error!("{} ❌ 创建{}失败: {}", log_ctx(), kind, e);
            PlayerError::AllocationFailed(e)
        })
    }

    fn request_single(
        &self,
        which: SingleSlot,
        existing: Option<SlotRef>,
        wanted: SlotFormat,
        create: impl FnOnce(&dyn DeviceFactory) -> anyhow::Result<Arc<dyn OutputDevice>>,
    ) -> Result<SlotRef> {
        let kind = which.kind();

        // 第一步：当前槽位可用就直接复用
        let mut stale = None;
        let reused = {
            let inner = self.lock_alive()?;
            match which.get(&inner) {
                Some(current) if current.format() == wanted && !current.is_closed() => {
                    match existing {
                        Some(existing) if existing.id() == current.id() => Some(existing),
                        other => {
                            stale = other;
                            Some(current.acquire())
                        }
                    }
                }
                _ => {
                    stale = existing;
                    None
                }
            }
        };
        drop(stale);

        if let Some(slot_ref) = reused {
            debug!("{} ♻️  复用{} 槽位 #{}", log_ctx(), kind, slot_ref.id());
            return Ok(slot_ref);
        }

        // 第二步：创建新设备
        let _creating = self.create_lock.lock();
        {
            // 等锁期间可能已经有别的线程创建好了
            let inner = self.lock_alive()?;
            if let Some(current) = which.get(&inner) {
                if current.format() == wanted && !current.is_closed() {
                    return Ok(current.acquire());
                }
            }
        }

        let device = self.create_device(kind, create)?;
        let slot = OutputSlot::new(self.next_slot_id(), device, wanted);

        // 第三步：登记，替换旧槽位
        let (slot_ref, old) = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                drop(inner);
                slot.force_close();
                return Err(PlayerError::Destroyed("资源管理器"));
            }
            let slot_ref = slot.acquire();
            let old = which.get_mut(&mut inner).replace(slot);
            (slot_ref, old)
        };

        info!(
            "{} ✅ 创建{} 槽位 #{}: {}",
            log_ctx(),
            kind,
            slot_ref.id(),
            slot_ref.device().description()
        );
        if let Some(old) = old {
            debug!("{} 🔄 替换旧的{} 槽位 #{}", log_ctx(), kind, old.id());
            old.retire();
        }
        Ok(slot_ref)
    }

    fn release_video_output(&self, existing: SlotRef, recycle: bool) {
        let (parked, retired) = {
            let mut inner = match self.lock_alive() {
                Ok(inner) => inner,
                Err(_) => return,
            };
            let Some(index) = inner.video_index(existing.id()) else {
                debug!("{} 视频槽位 #{} 已不在槽位表中，只释放引用", log_ctx(), existing.id());
                return;
            };
            let (_, slot) = inner.videos.remove(index);
            if recycle && inner.parked_video.is_none() && !slot.is_closed() {
                inner.parked_video = Some(Arc::clone(&slot));
                (Some(slot), None)
            } else {
                (None, Some(slot))
            }
        };
        drop(existing);

        if let Some(slot) = parked {
            slot.device().set_visible(false);
            info!("{} ♻️  视频槽位 #{} 已隐藏并停放待用", log_ctx(), slot.id());
        }
        if let Some(slot) = retired {
            debug!("{} 🗑️  释放视频槽位 #{}", log_ctx(), slot.id());
            slot.retire();
        }
    }

    fn acquire_video_output(
        &self,
        key: VideoKey,
        existing: Option<SlotRef>,
        format: &VideoFormat,
        recycle: bool,
    ) -> Result<SlotRef> {
        let mut stale = None;
        let (current, parked) = {
            let mut inner = self.lock_alive()?;
            let current = match existing {
                Some(existing) if inner.video_index(existing.id()).is_some() => Some(existing),
                other => {
                    stale = other;
                    inner
                        .videos
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, slot)| slot.acquire())
                }
            };
            let parked = if current.is_none() && recycle {
                inner.parked_video.take()
            } else {
                None
            };
            (current, parked)
        };
        drop(stale);

        // 复用当前输出
        if let Some(current) = current {
            if recycle && self.try_recycle(&current, format) {
                self.register_video(key, current.shared())?;
                debug!("{} ♻️  复用视频槽位 #{} ({})", log_ctx(), current.id(), format);
                return Ok(current);
            }
            let slot_ref = self.create_video_slot(key, format)?;
            self.retire_video(current);
            return Ok(slot_ref);
        }

        // 复用停放的输出
        if let Some(parked) = parked {
            if self.try_recycle(&parked, format) {
                let parked_ref = parked.acquire();
                if let Err(e) = self.register_video(key, &parked) {
                    drop(parked_ref);
                    parked.force_close();
                    return Err(e);
                }
                parked.device().set_visible(true);
                info!("{} ♻️  重新启用停放的视频槽位 #{} ({})", log_ctx(), parked.id(), format);
                return Ok(parked_ref);
            }
            return match self.create_video_slot(key, format) {
                Ok(slot_ref) => {
                    debug!("{} 🔄 停放的视频槽位 #{} 格式不兼容，已替换", log_ctx(), parked.id());
                    parked.retire();
                    Ok(slot_ref)
                }
                Err(e) => {
                    self.restore_parked(parked);
                    Err(e)
                }
            };
        }

        self.create_video_slot(key, format)
    }

    /// 检查兼容性并重新配置
    fn try_recycle(&self, slot: &OutputSlot, format: &VideoFormat) -> bool {
        if slot.is_closed() {
            return false;
        }
        let Some(current) = slot.video_format() else {
            return false;
        };
        if !self.config.recycle_policy.is_compatible(&current, format) {
            debug!("{} 视频格式不兼容: {} -> {}", log_ctx(), current, format);
            return false;
        }
        if current != *format {
            if let Err(e) = slot.device().reconfigure(format) {
                warn!("{} ⚠️  视频槽位 #{} 重新配置失败，改为新建: {}", log_ctx(), slot.id(), e);
                return false;
            }
            slot.set_format(SlotFormat::Video(*format));
        }
        true
    }

    fn create_video_slot(&self, key: VideoKey, format: &VideoFormat) -> Result<SlotRef> {
        let _creating = self.create_lock.lock();
        drop(self.lock_alive()?);

        let device = self.create_device(OutputKind::Video, |factory| factory.create_video(format))?;
        let slot = OutputSlot::new(self.next_slot_id(), device, SlotFormat::Video(*format));

        let (slot_ref, displaced) = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                drop(inner);
                slot.force_close();
                return Err(PlayerError::Destroyed("资源管理器"));
            }
            let slot_ref = slot.acquire();
            let displaced = inner.insert_video(key, slot);
            (slot_ref, displaced)
        };

        info!(
            "{} ✅ 创建视频槽位 #{} ({}): {}",
            log_ctx(),
            slot_ref.id(),
            key,
            format
        );
        if let Some(old) = displaced {
            old.retire();
        }
        Ok(slot_ref)
    }

    fn register_video(&self, key: VideoKey, slot: &Arc<OutputSlot>) -> Result<()> {
        let displaced = {
            let mut inner = self.lock_alive()?;
            inner.insert_video(key, Arc::clone(slot))
        };
        if let Some(old) = displaced {
            warn!("{} ⚠️  {} 已被视频槽位 #{} 占用，旧槽位被替换", log_ctx(), key, old.id());
            old.retire();
        }
        Ok(())
    }

    fn retire_video(&self, slot_ref: SlotRef) {
        let slot = Arc::clone(slot_ref.shared());
        {
            let mut inner = self.inner.lock();
            if let Some(index) = inner.video_index(slot.id()) {
                inner.videos.remove(index);
            }
        }
        drop(slot_ref);
        debug!("{} 🗑️  释放视频槽位 #{}", log_ctx(), slot.id());
        slot.retire();
    }

    fn restore_parked(&self, parked: Arc<OutputSlot>) {
        let rejected = {
            let mut inner = self.inner.lock();
            if inner.destroyed || inner.parked_video.is_some() {
                Some(parked)
            } else {
                inner.parked_video = Some(parked);
                None
            }
        };
        if let Some(slot) = rejected {
            slot.retire();
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
