use crate::core::{PlayerError, Result, TrackKind, VideoFormat};
use crate::player::log_ctx;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub resource: ResourceConfig,
    pub sync: SyncConfig,
}

/// 资源管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// 是否允许回收视频输出（关闭后每次释放都会销毁窗口）
    pub recycle_video: bool,
    /// 视频格式兼容性规则
    pub recycle_policy: RecyclePolicy,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            recycle_video: true,
            recycle_policy: RecyclePolicy::default(),
        }
    }
}

/// 视频输出回收规则
///
/// 兼容条件（全部满足）：
/// - 像素格式完全相同
/// - `require_same_aspect` 时像素宽高比相同
/// - 宽、高各自与当前格式的差距不超过 `dimension_tolerance`（相对当前尺寸的比例）
///
/// 默认容差为 0，即尺寸必须完全一致。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclePolicy {
    pub dimension_tolerance: f32,
    pub require_same_aspect: bool,
}

impl Default for RecyclePolicy {
    fn default() -> Self {
        Self {
            dimension_tolerance: 0.0,
            require_same_aspect: true,
        }
    }
}

impl RecyclePolicy {
    /// 当前格式的输出能否直接重新配置为请求的格式
    pub fn is_compatible(&self, current: &VideoFormat, requested: &VideoFormat) -> bool {
        if current.pixel_format != requested.pixel_format {
            return false;
        }
        if self.require_same_aspect && !current.same_aspect(requested) {
            return false;
        }
        Self::within(current.width, requested.width, self.dimension_tolerance)
            && Self::within(current.height, requested.height, self.dimension_tolerance)
    }

    fn within(current: u32, requested: u32, tolerance: f32) -> bool {
        let diff = (current as f64 - requested as f64).abs();
        diff <= current as f64 * tolerance as f64
    }
}

/// 解码器同步配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub buffering: BufferingConfig,
}

/// 缓冲目标：解码出多少帧后认为缓冲已满
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    pub video_frames: usize,
    pub audio_frames: usize,
    pub spu_frames: usize,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            video_frames: 2,
            audio_frames: 4,
            spu_frames: 1,
        }
    }
}

impl BufferingConfig {
    /// 某类轨道的缓冲目标
    pub fn target_for(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Video => self.video_frames,
            TrackKind::Audio => self.audio_frames,
            TrackKind::Spu => self.spu_frames,
        }
    }
}

impl CoreConfig {
    /// 从 JSON 字符串解析（缺失字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        info!("{} ⚙️  已加载配置: {}", log_ctx(), path.display());
        Ok(config)
    }

    /// 有路径则加载，否则使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// 检查配置是否合法
    pub fn validate(&self) -> Result<()> {
        let tolerance = self.resource.recycle_policy.dimension_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(PlayerError::ConfigError(format!(
                "dimension_tolerance 必须是非负数: {}",
                tolerance
            )));
        }

        let buffering = &self.sync.buffering;
        if buffering.video_frames == 0 || buffering.audio_frames == 0 || buffering.spu_frames == 0 {
            return Err(PlayerError::ConfigError("缓冲目标必须大于 0".to_string()));
        }

        Ok(())
    }
}
