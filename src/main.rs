use anyhow::{anyhow, Result};
use crossbeam::queue::SegQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};
use myy_input::core::{
    CoreConfig, FrameDisposition, PixelFormat, PlaybackClock, PlayerError, Timestamp, TrackKind,
    VideoFormat, VideoKey, CC_CHANNELS,
};
use myy_input::player::{DecoderHandle, DecoderSyncController, DeviceFactory, ResourceManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 演示用的播放列表项
struct DemoItem {
    name: &'static str,
    format: VideoFormat,
    captions: [bool; CC_CHANNELS],
    frames: usize,
}

/// 每帧间隔（微秒），约 25fps
const FRAME_INTERVAL: Timestamp = 40_000;

/// 已送去输出的帧
type Presented = Arc<SegQueue<(TrackKind, Timestamp)>>;

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Input - 无头同步演示启动");

    let config_path = std::env::var_os("MYY_INPUT_CONFIG").map(PathBuf::from);
    let config = CoreConfig::load_or_default(config_path.as_deref())?;

    let playlist = [
        DemoItem {
            name: "file:///demo/episode-01.mkv",
            format: VideoFormat::new(1920, 1080, PixelFormat::YUV420P),
            captions: [true, false, false, false],
            frames: 50,
        },
        // 相同格式：视频窗口被回收复用
        DemoItem {
            name: "file:///demo/episode-02.mkv",
            format: VideoFormat::new(1920, 1080, PixelFormat::YUV420P),
            captions: [false; CC_CHANNELS],
            frames: 40,
        },
        // 格式变化：重新创建视频输出
        DemoItem {
            name: "file:///demo/trailer.mp4",
            format: VideoFormat::new(1280, 720, PixelFormat::NV12),
            captions: [true, true, false, false],
            frames: 30,
        },
    ];

    let resources = ResourceManager::new(device_factory(), config.resource.clone());
    let clock = PlaybackClock::new();

    for item in &playlist {
        if let Err(e) = play_item(&resources, &config, &clock, item) {
            error!("❌ 播放 {} 失败: {}", item.name, e);
        }
    }

    resources.destroy();
    info!("✅ 演示结束");
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn device_factory() -> Arc<dyn DeviceFactory> {
    Arc::new(myy_input::player::CpalDeviceFactory::default())
}

#[cfg(not(feature = "cpal-output"))]
fn device_factory() -> Arc<dyn DeviceFactory> {
    Arc::new(myy_input::player::NullDeviceFactory)
}

/// 播放一个列表项：申请输出 → 缓冲 → 播放 / 暂停 → 排空 → 释放
fn play_item(
    resources: &ResourceManager,
    config: &CoreConfig,
    clock: &PlaybackClock,
    item: &DemoItem,
) -> Result<()> {
    info!("📂 打开: {}", item.name);
    resources.set_input(Some(item.name.to_string()));

    // 声卡不可用时继续播放（无声）
    let audio = match resources.request_audio_output(None) {
        Ok(audio) => Some(audio),
        Err(e) => {
            warn!("⚠️  没有音频输出，继续播放（无声）: {}", e);
            None
        }
    };
    let vout = resources
        .request_video_output(VideoKey::MAIN, None, Some(&item.format), true)?
        .ok_or_else(|| anyhow!("没有拿到视频输出"))?;
    info!("🖼️  视频输出: {}", vout.device().description());

    let controller = Arc::new(DecoderSyncController::new(config.sync.clone()));
    let presented: Presented = Arc::new(SegQueue::new());

    let mut feeds = Vec::new();
    let mut decoder_threads = Vec::new();
    for kind in [TrackKind::Audio, TrackKind::Video, TrackKind::Spu] {
        let handle = controller.create_decoder(kind)?;
        if kind == TrackKind::Video {
            handle.set_cc_present(item.captions);
            if let Some(channel) = item.captions.iter().position(|present| *present) {
                handle.set_cc_state(true, channel)?;
            }
        }
        let (tx, rx) = bounded::<Timestamp>(16);
        feeds.push((handle.clone(), tx));
        decoder_threads.push(spawn_decoder(handle, rx, presented.clone()));
    }

    // 启动前先缓冲
    controller.start_buffering_all();
    let demux = spawn_demux(feeds, item.frames);
    match controller.wait_buffering_all() {
        Ok(()) => info!("✅ 缓冲完成：开始播放"),
        Err(PlayerError::Cancelled) => warn!("⚠️  缓冲被取消"),
        Err(e) => return Err(e.into()),
    }
    controller.stop_buffering_all();
    clock.set_time(0);
    controller.change_pause(false, clock.play());

    // 中途暂停一下，所有轨道在同一时刻暂停 / 恢复
    thread::sleep(Duration::from_millis(30));
    controller.change_pause(true, clock.pause());
    let windows = resources.hold_all_video_outputs();
    info!(
        "⏸️  暂停中，媒体位置 {}us，当前 {} 个视频窗口",
        clock.position(),
        windows.len()
    );
    drop(windows);
    thread::sleep(Duration::from_millis(30));
    controller.change_pause(false, clock.play());

    if demux.join().is_err() {
        error!("❌ 解封装线程异常退出");
    }

    // 等待所有轨道排空（EOF）
    let deadline = Instant::now() + Duration::from_secs(2);
    while !controller.is_empty_all() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    controller.close();
    for decoder in decoder_threads {
        if decoder.join().is_err() {
            error!("❌ 解码线程异常退出");
        }
    }
    info!("📊 {} 共输出 {} 帧", item.name, presented.len());

    // 释放输出：视频窗口停放待下一项复用，声卡留在资源管理器中
    resources.request_video_output(VideoKey::MAIN, Some(vout), None, true)?;
    if let Some(audio) = audio {
        audio.release();
    }
    resources.set_input(None);
    Ok(())
}

/// 模拟解封装线程：为每条轨道送入压缩数据块
fn spawn_demux(
    feeds: Vec<(Arc<DecoderHandle>, Sender<Timestamp>)>,
    frames: usize,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for index in 0..frames {
            let pts = index as Timestamp * FRAME_INTERVAL;
            for (handle, tx) in &feeds {
                // 字幕只有少量数据块
                if handle.kind() == TrackKind::Spu && index % 10 != 0 {
                    continue;
                }
                handle.block_queued();
                if tx.send(pts).is_err() {
                    handle.block_taken();
                    warn!("⚠️  {} 解码线程已退出，停止送数据", handle.kind());
                    return;
                }
            }
        }
        info!("📄 解封装到达文件末尾");
    })
}

/// 模拟解码线程：取数据块 → 等待恢复播放 → 解码 → 按显示时间输出
fn spawn_decoder(
    handle: Arc<DecoderHandle>,
    rx: Receiver<Timestamp>,
    presented: Presented,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut withheld: Vec<Timestamp> = Vec::new();
        while let Ok(pts) = rx.recv() {
            handle.block_taken();
            if handle.wait_unpaused().is_err() {
                break;
            }

            match handle.frame_decoded() {
                FrameDisposition::Withhold => withheld.push(pts),
                FrameDisposition::Present => {
                    for pts in withheld.drain(..).chain(std::iter::once(pts)) {
                        if let Some(date) = handle.display_date(pts) {
                            presented.push((handle.kind(), date));
                        }
                    }
                }
            }
        }
        info!("🛑 {} 解码线程退出", handle.kind());
    })
}
