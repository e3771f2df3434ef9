use serde::{Deserialize, Serialize};
use std::fmt;

/// 时间戳（微秒）
///
/// 暂停生效时间、显示时间、延迟偏移都使用这个单位
pub type Timestamp = i64;

/// 每条轨道最多的隐藏字幕（CC）通道数
pub const CC_CHANNELS: usize = 4;

/// 输出设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// 音频输出（声卡）
    Audio,
    /// 视频输出（窗口 / 渲染表面）
    Video,
    /// 流输出（转码 / 复用器）
    StreamOutput,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Audio => "音频输出",
            OutputKind::Video => "视频输出",
            OutputKind::StreamOutput => "流输出",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 轨道（基本流）类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    /// 字幕 / 隐藏字幕
    Spu,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "音频",
            TrackKind::Video => "视频",
            TrackKind::Spu => "字幕",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 视频格式描述（用于视频输出的创建和回收判断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sar_num: u32, // 像素宽高比（分子）
    pub sar_den: u32, // 像素宽高比（分母）
}

impl VideoFormat {
    /// 创建方形像素的视频格式
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            sar_num: 1,
            sar_den: 1,
        }
    }

    /// 设置像素宽高比
    pub fn with_sar(mut self, num: u32, den: u32) -> Self {
        self.sar_num = num;
        self.sar_den = den;
        self
    }

    /// 像素宽高比是否相同（按比例比较，4:3 与 8:6 视为相同）
    pub fn same_aspect(&self, other: &VideoFormat) -> bool {
        let lhs = self.sar_num as u64 * other.sar_den.max(1) as u64;
        let rhs = other.sar_num as u64 * self.sar_den.max(1) as u64;
        lhs == rhs
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {:?} (sar {}:{})",
            self.width, self.height, self.pixel_format, self.sar_num, self.sar_den
        )
    }
}

/// 视频输出的标识（窗口 / 轨道关联），同一管理器内不重复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VideoKey(pub u32);

impl VideoKey {
    /// 主窗口
    pub const MAIN: VideoKey = VideoKey(0);
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vout#{}", self.0)
    }
}

/// 暂停状态（暂停标志 + 生效时间）
///
/// 作为一个整体读写：读者永远不会看到新的暂停标志配旧的时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseState {
    pub paused: bool,
    pub date: Timestamp,
}

impl PauseState {
    /// 初始状态：播放中
    pub const PLAYING: PauseState = PauseState {
        paused: false,
        date: 0,
    };
}

impl Default for PauseState {
    fn default() -> Self {
        Self::PLAYING
    }
}

/// 解码完成的帧如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// 缓冲中，帧留在解码器队列里
    Withhold,
    /// 可以显示 / 播放
    Present,
}
