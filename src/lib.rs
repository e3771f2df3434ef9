//! 播放器输入核心
//!
//! - [`player::ResourceManager`]：持有并回收音频 / 视频 / 流输出设备，跨播放列表项复用
//! - [`player::DecoderSyncController`]：协调各轨道解码器的缓冲、暂停、延迟和隐藏字幕通道

pub mod core;
pub mod player;

pub use crate::core::{CoreConfig, PlayerError, Result};
pub use crate::player::{DecoderHandle, DecoderSyncController, ResourceManager, SlotRef};
