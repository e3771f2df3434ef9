use crate::core::{OutputKind, VideoFormat};
use crate::player::log_ctx;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 具体输出设备（声卡、视频窗口、复用器）
///
/// 资源管理器只负责设备的获取、共享和回收，设备协议本身由实现者决定。
pub trait OutputDevice: Send + Sync {
    /// 设备类型
    fn kind(&self) -> OutputKind;

    /// 原生句柄（用于判断两次请求是否拿到了同一个设备）
    fn native_id(&self) -> u64;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    /// 按新的视频格式重新配置（回收视频输出时调用）
    fn reconfigure(&self, _format: &VideoFormat) -> anyhow::Result<()> {
        Ok(())
    }

    /// 显示 / 隐藏（被回收待用的视频窗口会被隐藏）
    fn set_visible(&self, _visible: bool) {}

    /// 关闭底层设备，之后不会再被调用
    fn close(&self);
}

/// 设备工厂 - 创建可能很慢（打开硬件、创建复用器），调用时不持有槽位表锁
pub trait DeviceFactory: Send + Sync {
    fn create_audio(&self) -> anyhow::Result<Arc<dyn OutputDevice>>;

    fn create_video(&self, format: &VideoFormat) -> anyhow::Result<Arc<dyn OutputDevice>>;

    fn create_stream_output(&self, destination: &str) -> anyhow::Result<Arc<dyn OutputDevice>>;
}

static NEXT_NATIVE_ID: AtomicU64 = AtomicU64::new(1);

/// 分配一个进程内唯一的原生句柄
pub fn next_native_id() -> u64 {
    NEXT_NATIVE_ID.fetch_add(1, Ordering::Relaxed)
}

/// 无头设备 - 只记录状态，不接触任何硬件
pub struct NullDevice {
    kind: OutputKind,
    native_id: u64,
    label: String,
    state: Mutex<NullDeviceState>,
}

#[derive(Debug, Default)]
struct NullDeviceState {
    format: Option<VideoFormat>,
    visible: bool,
    closed: bool,
}

impl NullDevice {
    pub fn new(kind: OutputKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            native_id: next_native_id(),
            label: label.into(),
            state: Mutex::new(NullDeviceState {
                visible: true,
                ..Default::default()
            }),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn format(&self) -> Option<VideoFormat> {
        self.state.lock().format
    }
}

impl OutputDevice for NullDevice {
    fn kind(&self) -> OutputKind {
        self.kind
    }

    fn native_id(&self) -> u64 {
        self.native_id
    }

    fn description(&self) -> String {
        format!("{} #{} ({})", self.kind, self.native_id, self.label)
    }

    fn reconfigure(&self, format: &VideoFormat) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            anyhow::bail!("设备 #{} 已关闭", self.native_id);
        }
        state.format = Some(*format);
        debug!("{} 🖼️  无头视频输出 #{} 重新配置为 {}", log_ctx(), self.native_id, format);
        Ok(())
    }

    fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!("{} 🗑️  无头设备已关闭: {} #{}", log_ctx(), self.kind, self.native_id);
        }
    }
}

/// 无头设备工厂 - 演示程序和没有硬件的环境使用
#[derive(Debug, Default)]
pub struct NullDeviceFactory;

impl DeviceFactory for NullDeviceFactory {
    fn create_audio(&self) -> anyhow::Result<Arc<dyn OutputDevice>> {
        info!("{} 🔊 创建无头音频输出", log_ctx());
        Ok(Arc::new(NullDevice::new(OutputKind::Audio, "null-audio")))
    }

    fn create_video(&self, format: &VideoFormat) -> anyhow::Result<Arc<dyn OutputDevice>> {
        info!("{} 🖼️  创建无头视频输出: {}", log_ctx(), format);
        let device = NullDevice::new(OutputKind::Video, "null-video");
        device.reconfigure(format)?;
        Ok(Arc::new(device))
    }

    fn create_stream_output(&self, destination: &str) -> anyhow::Result<Arc<dyn OutputDevice>> {
        info!("{} 📡 创建无头流输出: {}", log_ctx(), destination);
        Ok(Arc::new(NullDevice::new(OutputKind::StreamOutput, destination)))
    }
}
