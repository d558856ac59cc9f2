//! 采集线程 (Capture loop)
//!
//! 职责: 以视频源自身帧率读帧 → 缩放到配置尺寸 → 覆盖写入 FrameSlot。
//! 读失败时短暂退避重试,连续失败过多则关闭并重新打开同一视频源。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::source::{Frame, FrameSource, SourceOpener};
use crate::config::{FrameConfig, RuntimeConfig};

// ========== 最新帧槽位 ==========

#[derive(Default)]
struct SlotState {
    latest: Option<Frame>,
    fresh: bool,
    next_id: u64,
    dropped: u64,
}

/// 单帧槽位: 只保留最新一帧,后写覆盖先写 (永不排队)
///
/// 采集线程写入,处理线程 `take_fresh` 取走,叠加渲染用 `latest` 只读。
#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 写入新帧,返回分配的帧序号
    pub fn put(&self, image: RgbImage) -> u64 {
        let mut state = self.lock();
        let frame_id = state.next_id;
        state.next_id += 1;
        if state.fresh {
            state.dropped += 1;
        }
        state.latest = Some(Frame::new(image, frame_id));
        state.fresh = true;
        frame_id
    }

    /// 取出尚未处理过的最新帧; 已处理过则返回 None
    pub fn take_fresh(&self) -> Option<Frame> {
        let mut state = self.lock();
        if !state.fresh {
            return None;
        }
        state.fresh = false;
        state.latest.clone()
    }

    /// 最新帧 (不改变新鲜标记)
    pub fn latest(&self) -> Option<Frame> {
        self.lock().latest.clone()
    }

    /// 清空槽位 (切换视频源时调用); 帧序号继续递增
    pub fn clear(&self) {
        let mut state = self.lock();
        state.latest = None;
        state.fresh = false;
    }

    /// 未被处理就被覆盖的帧数
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

// ========== 采集线程 ==========

/// 分段睡眠,及时响应停止信号
fn nap(stop: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(5);
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}

/// 采集工作者: 绑定一个摄像头索引,在独立线程中运行
pub struct CaptureWorker {
    opener: Arc<dyn SourceOpener>,
    camera_index: usize,
    slot: Arc<FrameSlot>,
    frame: FrameConfig,
    runtime: RuntimeConfig,
    stop: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        camera_index: usize,
        slot: Arc<FrameSlot>,
        frame: FrameConfig,
        runtime: RuntimeConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            opener,
            camera_index,
            slot,
            frame,
            runtime,
            stop,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// 打开视频源,失败则按间隔重试直到成功或收到停止信号
    fn open_source(&self) -> Option<Box<dyn FrameSource>> {
        let mut attempts = 0u32;
        while !self.stopped() {
            match self.opener.open(self.camera_index) {
                Ok(source) => {
                    info!("📹 摄像头 {} 已打开: {}", self.camera_index, source.name());
                    return Some(source);
                }
                Err(e) => {
                    attempts += 1;
                    // 首次失败报 warn,之后降为 debug 避免刷屏
                    if attempts == 1 {
                        warn!("⚠️ 无法打开摄像头 {}: {:#}", self.camera_index, e);
                    } else {
                        debug!("摄像头 {} 第 {} 次打开失败: {:#}", self.camera_index, attempts, e);
                    }
                    nap(&self.stop, self.runtime.open_retry());
                }
            }
        }
        None
    }

    fn fit(&self, image: RgbImage) -> RgbImage {
        if image.dimensions() == (self.frame.width, self.frame.height) {
            image
        } else {
            imageops::resize(&image, self.frame.width, self.frame.height, FilterType::Triangle)
        }
    }

    /// 主循环 (阻塞直到停止)
    pub fn run(self) {
        info!("🎬 采集线程启动 (camera {})", self.camera_index);

        let mut source = None;
        let mut failures = 0u32;
        let mut frames = 0u32;
        let mut window_start = Instant::now();

        while !self.stopped() {
            if source.is_none() {
                source = self.open_source();
            }
            let Some(src) = source.as_mut() else {
                break;
            };

            match src.read() {
                Ok(image) => {
                    failures = 0;
                    if self.stopped() {
                        break;
                    }
                    self.slot.put(self.fit(image));
                    frames += 1;
                }
                Err(e) => {
                    failures += 1;
                    debug!("读帧失败 ({}/{}): {:#}", failures, self.runtime.max_read_failures, e);
                    if failures >= self.runtime.max_read_failures {
                        error!(
                            "❌ 摄像头 {} 连续 {} 次读帧失败,重新打开",
                            self.camera_index, failures
                        );
                        source = None;
                        failures = 0;
                    } else {
                        nap(&self.stop, self.runtime.read_retry());
                    }
                }
            }

            let elapsed = window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                debug!(
                    "📊 采集 {:.1} fps, 覆盖丢弃 {} 帧",
                    frames as f32 / elapsed.as_secs_f32(),
                    self.slot.dropped()
                );
                frames = 0;
                window_start = Instant::now();
            }
        }

        info!("🛑 采集线程退出 (camera {})", self.camera_index);
    }
}
