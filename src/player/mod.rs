// 输入核心模块：输出资源管理 + 解码器同步

#[cfg(feature = "cpal-output")]
pub mod audio_output;
pub mod decoder_handle;
pub mod device;
pub mod resource;
pub mod slot;
pub mod sync_controller;

use std::process;
use std::thread;

#[cfg(feature = "cpal-output")]
pub use audio_output::{CpalAudioOutput, CpalDeviceFactory};
pub use decoder_handle::DecoderHandle;
pub use device::{DeviceFactory, NullDevice, NullDeviceFactory, OutputDevice};
pub use resource::ResourceManager;
pub use slot::{OutputSlot, SlotFormat, SlotRef};
pub use sync_controller::DecoderSyncController;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
