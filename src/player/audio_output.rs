use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crate::core::{OutputKind, VideoFormat};
use crate::player::device::{next_native_id, DeviceFactory, NullDevice, OutputDevice};
use crate::player::log_ctx;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 音频输出 - 使用 cpal 播放音频，作为资源管理器的音频设备
pub struct CpalAudioOutput {
    native_id: u64,
    device: Device,
    config: StreamConfig,
    stream: Mutex<Option<Stream>>,
}

// cpal::Stream 本身不是 Send/Sync，但它只在锁内被创建和 drop，回调线程不访问 self
unsafe impl Send for CpalAudioOutput {}
unsafe impl Sync for CpalAudioOutput {}

impl CpalAudioOutput {
    /// 打开默认输出设备（不支持的配置自动回退到标准配置）
    pub fn open(sample_rate: u32, channels: u16) -> anyhow::Result<Self> {
        info!("{} 初始化音频输出: {} Hz, {} 声道", log_ctx(), sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("无法找到音频输出设备"))?;

        debug!("{} 使用音频设备: {}", log_ctx(), device.name().unwrap_or_default());

        let requested = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let config = if Self::is_supported(&device, &requested)? {
            requested
        } else {
            warn!("{} ⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", log_ctx(), sample_rate, channels);

            // 常见配置依次尝试
            const FALLBACKS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            let mut found = None;
            for (fb_rate, fb_channels) in FALLBACKS {
                let candidate = StreamConfig {
                    channels: fb_channels,
                    sample_rate: cpal::SampleRate(fb_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if Self::is_supported(&device, &candidate)? {
                    info!("{} ✅ 使用回退配置: {} Hz, {} 声道", log_ctx(), fb_rate, fb_channels);
                    found = Some(candidate);
                    break;
                }
            }
            found.ok_or_else(|| {
                anyhow::anyhow!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate,
                    channels
                )
            })?
        };

        Ok(Self {
            native_id: next_native_id(),
            device,
            config,
            stream: Mutex::new(None),
        })
    }

    fn is_supported(device: &Device, config: &StreamConfig) -> anyhow::Result<bool> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| anyhow::anyhow!("无法获取支持的音频配置: {}", e))?;
        Ok(supported.into_iter().any(|range| Self::is_config_compatible(config, &range)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range && config.channels == supported.channels()
    }

    /// 打开输出流（持有声卡，没有采样时输出静音）
    pub fn start(&self) -> anyhow::Result<()> {
        let mut stream_slot = self.stream.lock();
        if stream_slot.is_some() {
            return Ok(());
        }

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                },
                move |err| {
                    error!("{} 音频流错误: {}", log_ctx(), err);
                },
                None,
            )
            .map_err(|e| anyhow::anyhow!("创建音频流失败: {}", e))?;

        stream
            .play()
            .map_err(|e| anyhow::anyhow!("启动音频流失败: {}", e))?;

        *stream_slot = Some(stream);
        info!("{} 🔊 音频输出已启动", log_ctx());
        Ok(())
    }

    /// 获取实际使用的音频配置
    pub fn get_config(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }
}

impl OutputDevice for CpalAudioOutput {
    fn kind(&self) -> OutputKind {
        OutputKind::Audio
    }

    fn native_id(&self) -> u64 {
        self.native_id
    }

    fn description(&self) -> String {
        let (rate, channels) = self.get_config();
        format!(
            "cpal {} ({} Hz, {} 声道)",
            self.device.name().unwrap_or_default(),
            rate,
            channels
        )
    }

    fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            drop(stream);
            info!("{} 音频输出已停止", log_ctx());
        }
    }
}

/// cpal 设备工厂：音频走真实声卡，视频和流输出使用无头设备
pub struct CpalDeviceFactory {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CpalDeviceFactory {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl DeviceFactory for CpalDeviceFactory {
    fn create_audio(&self) -> anyhow::Result<Arc<dyn OutputDevice>> {
        let output = CpalAudioOutput::open(self.sample_rate, self.channels)?;
        output.start()?;
        Ok(Arc::new(output))
    }

    fn create_video(&self, format: &VideoFormat) -> anyhow::Result<Arc<dyn OutputDevice>> {
        let device = NullDevice::new(OutputKind::Video, "cpal-headless-video");
        device.reconfigure(format)?;
        Ok(Arc::new(device))
    }

    fn create_stream_output(&self, destination: &str) -> anyhow::Result<Arc<dyn OutputDevice>> {
        Ok(Arc::new(NullDevice::new(OutputKind::StreamOutput, destination)))
    }
}
