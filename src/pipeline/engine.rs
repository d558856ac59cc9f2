//! 人群监控引擎 (Crowd engine)
//!
//! 每个活动摄像头两条线程,一起启动、一起停止 (协作式停止标志):
//! - 采集线程: 按摄像头帧率覆盖写入最新帧槽位
//! - 处理线程: 按检测器节奏取最新帧 → Processor → 整体替换快照

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{info, warn};

use super::overlay;
use super::processor::Processor;
use super::snapshot::{PublishedMetrics, RiskSnapshot, SnapshotPublisher};
use crate::analytics::EscalationPolicy;
use crate::config::{EngineConfig, RuntimeConfig};
use crate::detection::{Detector, Tracker};
use crate::input::{CaptureWorker, Frame, FrameSlot, SourceOpener};

const NO_SIGNAL: &str = "No video signal.";

/// 运行中的线程句柄
struct Workers {
    stop: Arc<AtomicBool>,
    capture: JoinHandle<()>,
    processing: JoinHandle<Processor>,
}

pub struct CrowdEngine {
    config: EngineConfig,
    opener: Arc<dyn SourceOpener>,
    slot: Arc<FrameSlot>,
    publisher: Arc<SnapshotPublisher>,
    /// 停止时由引擎保管,运行时在处理线程中
    processor: Option<Processor>,
    workers: Option<Workers>,
    camera_index: usize,
}

impl CrowdEngine {
    pub fn new(
        config: EngineConfig,
        opener: impl SourceOpener + 'static,
        detector: impl Detector + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let processor = Processor::new(&config, Box::new(detector));
        Ok(Self {
            config,
            opener: Arc::new(opener),
            slot: Arc::new(FrameSlot::new()),
            publisher: Arc::new(SnapshotPublisher::default()),
            processor: Some(processor),
            workers: None,
            camera_index: 0,
        })
    }

    /// 替换跟踪算法 (启动前调用)
    pub fn with_tracker(mut self, tracker: impl Tracker + 'static) -> Self {
        if let Some(p) = self.processor.as_mut() {
            p.set_tracker(Box::new(tracker));
        }
        self
    }

    /// 替换升级策略 (启动前调用)
    pub fn with_escalation(mut self, policy: impl EscalationPolicy + 'static) -> Self {
        if let Some(p) = self.processor.as_mut() {
            p.set_escalation(Box::new(policy));
        }
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    /// 启动采集与处理线程
    pub fn start(&mut self, camera_index: usize) -> Result<()> {
        if self.is_running() {
            bail!("engine already running on camera {}", self.camera_index);
        }
        let processor = self
            .processor
            .take()
            .ok_or_else(|| anyhow!("processing state was lost after a worker panic"))?;

        self.camera_index = camera_index;
        self.slot.clear();
        let stop = Arc::new(AtomicBool::new(false));

        let processing = {
            let slot = self.slot.clone();
            let publisher = self.publisher.clone();
            let stop = stop.clone();
            let runtime = self.config.runtime.clone();
            thread::Builder::new()
                .name("crowd-processing".into())
                .spawn(move || processing_loop(processor, slot, publisher, stop, runtime))
                .context("spawning processing thread")?
        };

        let worker = CaptureWorker::new(
            self.opener.clone(),
            camera_index,
            self.slot.clone(),
            self.config.frame.clone(),
            self.config.runtime.clone(),
            stop.clone(),
        );
        let capture = match thread::Builder::new()
            .name("crowd-capture".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                if let Ok(p) = processing.join() {
                    self.processor = Some(p);
                }
                return Err(e).context("spawning capture thread");
            }
        };

        self.workers = Some(Workers {
            stop,
            capture,
            processing,
        });
        info!("🚀 监控启动: camera {}", camera_index);
        Ok(())
    }

    /// 停止两条线程并等待退出; 未运行时为空操作
    pub fn stop(&mut self) -> Result<()> {
        let Some(workers) = self.workers.take() else {
            return Ok(());
        };
        workers.stop.store(true, Ordering::SeqCst);

        let capture = workers.capture.join();
        let processing = workers.processing.join();

        let mut processor = processing.map_err(|_| anyhow!("processing thread panicked"))?;
        self.publisher
            .publish(processor.idle_snapshot("Monitoring stopped."));
        self.processor = Some(processor);
        capture.map_err(|_| anyhow!("capture thread panicked"))?;

        info!("🛑 监控停止: camera {}", self.camera_index);
        Ok(())
    }

    /// 切换视频源: 停止两条线程,清空旧画面的跟踪表,用新索引重新启动
    /// (未运行时只记录索引)
    pub fn switch_source(&mut self, camera_index: usize) -> Result<()> {
        let was_running = self.is_running();
        self.stop()?;
        info!("🔄 切换摄像头 {} → {}", self.camera_index, camera_index);
        if let Some(p) = self.processor.as_mut() {
            p.reset_tracking();
        }
        self.camera_index = camera_index;
        self.slot.clear();
        if was_running {
            self.start(camera_index)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<RiskSnapshot> {
        self.publisher.latest()
    }

    pub fn metrics(&self) -> PublishedMetrics {
        self.publisher.metrics()
    }

    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        self.publisher.clone()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// 最新帧 + 最新快照叠加
    pub fn latest_annotated_frame(&self) -> Option<RgbImage> {
        let frame = self.slot.latest()?;
        Some(overlay::annotate(&frame.image, &self.snapshot(), &self.config))
    }

    /// 最新叠加帧的 JPEG 编码 (推流用); 尚无画面时为 None
    pub fn latest_jpeg(&self, quality: u8) -> Result<Option<Vec<u8>>> {
        let Some(image) = self.latest_annotated_frame() else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&image)
            .context("encoding annotated frame")?;
        Ok(Some(buf))
    }
}

impl Drop for CrowdEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("⚠️ 引擎关闭异常: {:#}", e);
        }
    }
}

/// 处理线程主循环,退出时交还 Processor
fn processing_loop(
    mut processor: Processor,
    slot: Arc<FrameSlot>,
    publisher: Arc<SnapshotPublisher>,
    stop: Arc<AtomicBool>,
    runtime: RuntimeConfig,
) -> Processor {
    info!("🔍 处理线程启动 (detector: {})", processor.detector_name());
    let mut last_frame = Instant::now();
    let mut idle_published = false;

    while !stop.load(Ordering::Relaxed) {
        match slot.take_fresh() {
            Some(frame) => {
                let snapshot = processor.process(&frame);
                publisher.publish(snapshot);
                last_frame = Instant::now();
                idle_published = false;
            }
            None => {
                if !idle_published && last_frame.elapsed() >= runtime.stale_after() {
                    warn!("⚠️ {}ms 内没有新画面", runtime.stale_after_ms);
                    publisher.publish(processor.idle_snapshot(NO_SIGNAL));
                    idle_published = true;
                }
                thread::sleep(runtime.idle_poll());
            }
        }
    }

    info!("🛑 处理线程退出");
    processor
}
