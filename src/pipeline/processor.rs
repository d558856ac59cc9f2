//! 处理单元 (Processor)
//! 职责: Frame → 检测 → 跟踪 → 分析 → 分级 → RiskSnapshot
//!
//! 处理线程独占本结构,检测和分析都在任何锁之外执行;
//! 线程结束时把它交还给引擎,跟踪 ID 和混乱度历史因此跨越启停保留。

use std::time::Instant;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::analytics::{
    escalation_from_config, AnalyticsEngine, EscalationPolicy, ThreatClassifier, ThreatLevel,
};
use crate::config::EngineConfig;
use crate::detection::{
    detect_persons, CentroidTracker, DetectionFilter, Detector, TrackedObject, Tracker,
};
use crate::input::Frame;
use crate::pipeline::snapshot::{ObjectView, RiskSnapshot};

/// 每秒一次的处理统计
struct ProcessingStats {
    cycles: u32,
    window_start: Instant,
    fps: f64,
    inference_ms_sum: f64,
}

impl ProcessingStats {
    fn new() -> Self {
        Self {
            cycles: 0,
            window_start: Instant::now(),
            fps: 0.0,
            inference_ms_sum: 0.0,
        }
    }

    /// 记录一个周期; 满一秒时返回 (fps, 平均推理耗时)
    fn record(&mut self, inference_ms: f64) -> Option<(f64, f64)> {
        self.cycles += 1;
        self.inference_ms_sum += inference_ms;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return None;
        }
        self.fps = self.cycles as f64 / elapsed;
        let avg = self.inference_ms_sum / self.cycles as f64;
        self.cycles = 0;
        self.inference_ms_sum = 0.0;
        self.window_start = Instant::now();
        Some((self.fps, avg))
    }
}

fn object_view(o: &TrackedObject) -> ObjectView {
    ObjectView {
        id: o.id,
        centroid: o.centroid,
        bbox: o.bbox,
        direction: o.current_direction(),
        speed: o.smoothed_speed().unwrap_or(0.0),
        state: o.state(),
    }
}

pub struct Processor {
    detector: Box<dyn Detector>,
    filter: DetectionFilter,
    tracker: Box<dyn Tracker>,
    analytics: AnalyticsEngine,
    classifier: ThreatClassifier,
    escalation: Box<dyn EscalationPolicy>,
    stats: ProcessingStats,
    last_level: ThreatLevel,
}

impl Processor {
    pub fn new(config: &EngineConfig, detector: Box<dyn Detector>) -> Self {
        Self {
            detector,
            filter: DetectionFilter::new(&config.detector),
            tracker: Box::new(CentroidTracker::new(&config.tracker)),
            analytics: AnalyticsEngine::new(&config.analytics, &config.grid, &config.frame),
            classifier: ThreatClassifier::new(&config.threat),
            escalation: escalation_from_config(&config.escalation),
            stats: ProcessingStats::new(),
            last_level: ThreatLevel::Normal,
        }
    }

    pub fn set_tracker(&mut self, tracker: Box<dyn Tracker>) {
        self.tracker = tracker;
    }

    pub fn set_escalation(&mut self, escalation: Box<dyn EscalationPolicy>) {
        self.escalation = escalation;
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn track_count(&self) -> usize {
        self.tracker.track_count()
    }

    /// 处理一帧,生成完整快照
    pub fn process(&mut self, frame: &Frame) -> RiskSnapshot {
        let t0 = Instant::now();
        let detections = detect_persons(self.detector.as_mut(), &self.filter, frame);
        let inference_ms = t0.elapsed().as_secs_f64() * 1000.0;

        self.tracker.update(&detections.boxes);
        let removed = self.tracker.last_removed();
        if !removed.is_empty() {
            debug!("🗑️ 移除跟踪 {:?}", removed);
        }
        let objects = self.tracker.objects();
        let metrics = self.analytics.analyze(&objects);
        let assessment = self.classifier.classify(&metrics);
        let assessment = self.escalation.apply(assessment, Instant::now());
        let views: Vec<ObjectView> = objects.iter().map(|o| object_view(o)).collect();

        if assessment.level != self.last_level {
            if assessment.level > self.last_level {
                warn!(
                    "🚨 威胁等级 {} → {}: {}",
                    self.last_level, assessment.level, assessment.reason
                );
            } else {
                info!("✅ 威胁等级 {} → {}", self.last_level, assessment.level);
            }
            self.last_level = assessment.level;
        }

        if let Some((fps, avg_ms)) = self.stats.record(inference_ms) {
            info!(
                "📊 处理 {:.1} fps | 人数 {} | 风险 {:.0}% | 推理 {:.1}ms",
                fps,
                metrics.person_count,
                metrics.risk_score * 100.0,
                avg_ms
            );
        }
        debug!(
            "frame {} (age {:.1}ms) → {} boxes, {} tracks, chaos {:.2}",
            frame.frame_id,
            frame.captured_at.elapsed().as_secs_f64() * 1000.0,
            detections.boxes.len(),
            metrics.person_count,
            metrics.chaos_metric
        );

        RiskSnapshot {
            frame_id: Some(frame.frame_id),
            updated_at: Local::now(),
            person_count: metrics.person_count,
            chaos_metric: metrics.chaos_metric,
            risk_score: metrics.risk_score,
            conflict_count: metrics.conflict_count,
            max_density: metrics.max_density,
            threat_level: assessment.level,
            reason: assessment.reason,
            chaos_history: self.analytics.chaos_history(),
            density: metrics.density,
            conflict_cells: metrics.conflict_cells,
            objects: views,
            risk_components: metrics.components,
            inference_ms,
            processing_fps: self.stats.fps,
            degraded: detections.degraded,
        }
    }

    /// 换源: 清空跟踪表和升级状态,ID计数器与混乱度历史保留
    pub fn reset_tracking(&mut self) {
        self.tracker.reset();
        self.escalation.reset();
        self.last_level = ThreatLevel::Normal;
    }

    /// 无新帧时的 NORMAL 快照 (保留历史曲线)
    pub fn idle_snapshot(&mut self, reason: &str) -> RiskSnapshot {
        self.escalation.reset();
        self.last_level = ThreatLevel::Normal;
        let grid = self.analytics.grid();
        RiskSnapshot {
            chaos_history: self.analytics.chaos_history(),
            density: vec![vec![0; grid.cols()]; grid.rows()],
            ..RiskSnapshot::idle(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SustainedEscalation;
    use crate::detection::{BBox, Centroid, RawDetection};
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// 按脚本逐帧返回检测结果; 脚本用完后返回空
    fn scripted(frames: Vec<Vec<BBox>>) -> Box<dyn Detector> {
        let mut script: VecDeque<Vec<BBox>> = frames.into();
        Box::new(move |_: &Frame| -> Result<Vec<RawDetection>> {
            Ok(script
                .pop_front()
                .unwrap_or_default()
                .into_iter()
                .map(|b| RawDetection::person(b, 0.9))
                .collect())
        })
    }

    fn person(x: f32, y: f32) -> BBox {
        BBox::around(Centroid::new(x, y), 20.0, 40.0)
    }

    fn frame(id: u64) -> Frame {
        Frame::blank(640, 480, id)
    }

    #[test]
    fn test_lone_person_fades_out_to_normal() {
        let config = EngineConfig::default();
        let max = config.tracker.max_disappeared as usize;
        // 跟踪一人 max_disappeared 个周期,之后持续无检测
        let script = (0..max).map(|i| vec![person(100.0 + i as f32, 200.0)]).collect();
        let mut p = Processor::new(&config, scripted(script));

        let mut id = 0;
        for _ in 0..max {
            let s = p.process(&frame(id));
            id += 1;
            assert_eq!(s.person_count, 1);
        }
        let mut last = None;
        for _ in 0..=max {
            last = Some(p.process(&frame(id)));
            id += 1;
        }

        let s = last.unwrap();
        assert_eq!(s.person_count, 0);
        assert!(s.objects.is_empty());
        assert_eq!(s.threat_level, ThreatLevel::Normal);
        assert_eq!(s.reason, "Clear and orderly flow.");
        assert_eq!(p.track_count(), 0);
    }

    #[test]
    fn test_speed_surge_goes_critical_on_chaos() {
        let config = EngineConfig::default();
        // 先慢走 (1 px/周期),再以 30 px/周期奔跑
        let mut x = 20.0;
        let mut script = vec![vec![person(x, 240.0)]];
        for _ in 0..10 {
            x += 1.0;
            script.push(vec![person(x, 240.0)]);
        }
        for _ in 0..10 {
            x += 30.0;
            script.push(vec![person(x, 240.0)]);
        }
        let cycles = script.len();
        let mut p = Processor::new(&config, scripted(script));

        let mut snapshots = Vec::new();
        for i in 0..cycles {
            snapshots.push(p.process(&frame(i as u64)));
        }

        let calm = &snapshots[10];
        assert_eq!(calm.threat_level, ThreatLevel::Normal);
        assert_eq!(calm.chaos_metric, 0.0);

        let last = snapshots.last().unwrap();
        assert!(last.chaos_metric > 25.0);
        assert_eq!(last.person_count, 1);
        assert_eq!(last.threat_level, ThreatLevel::Critical);
        assert!(last.reason.contains("surge"), "{}", last.reason);
        assert_eq!(last.chaos_history.len(), cycles);
    }

    #[test]
    fn test_detector_failure_ages_tracks() {
        let config = EngineConfig::default();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let detector = move |_: &Frame| -> Result<Vec<RawDetection>> {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Ok(vec![RawDetection::person(person(300.0, 300.0), 0.9)])
            } else {
                Err(anyhow!("inference timeout"))
            }
        };
        let mut p = Processor::new(&config, Box::new(detector));

        assert_eq!(p.process(&frame(0)).person_count, 1);
        let s = p.process(&frame(1));
        assert!(s.degraded);
        assert_eq!(s.person_count, 1);
        assert_eq!(s.objects[0].state, crate::detection::TrackState::Disappearing);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_idle_snapshot_keeps_history() {
        let config = EngineConfig::default();
        let mut p = Processor::new(&config, scripted(vec![]));
        p.process(&frame(0));
        p.process(&frame(1));

        let idle = p.idle_snapshot("No video signal.");
        assert_eq!(idle.threat_level, ThreatLevel::Normal);
        assert_eq!(idle.chaos_history.len(), 2);
        assert_eq!(idle.density.len(), config.grid.rows);
        assert_eq!(idle.frame_id, None);
    }

    #[test]
    fn test_reset_tracking_keeps_static_scene_normal() {
        let config = EngineConfig::default();
        let cam_a = vec![person(100.0, 100.0), person(400.0, 300.0)];
        let cam_b = vec![person(20.0, 20.0), person(620.0, 460.0)];
        let script = vec![cam_a.clone(), cam_a, cam_b.clone(), cam_b.clone(), cam_b];
        let mut p = Processor::new(&config, scripted(script));

        p.process(&frame(0));
        let before = p.process(&frame(1));
        assert_eq!(before.threat_level, ThreatLevel::Normal);
        let old_ids: Vec<u64> = before.objects.iter().map(|o| o.id).collect();
        assert_eq!(old_ids, vec![0, 1]);

        p.reset_tracking();
        assert_eq!(p.track_count(), 0);
        for id in 2..5 {
            let s = p.process(&frame(id));
            assert_eq!(s.threat_level, ThreatLevel::Normal, "{}", s.reason);
            assert_eq!(s.chaos_metric, 0.0);
            assert_eq!(s.person_count, 2);
            assert!(s.objects.iter().all(|o| o.id > 1));
            assert!(s.objects.iter().all(|o| o.speed == 0.0));
        }
        // 混乱度历史跨换源保留
        assert_eq!(p.process(&frame(5)).chaos_history.len(), 6);
    }

    #[test]
    fn test_sustained_policy_escalates_crowd_warning() {
        let config = EngineConfig::default();
        // 9 人静止分散在不同单元 → WARNING (人数)
        let crowd: Vec<BBox> = (0..9)
            .map(|i| person(50.0 + (i % 6) as f32 * 106.0, 60.0 + (i / 6) as f32 * 120.0))
            .collect();
        let mut p = Processor::new(&config, scripted(vec![crowd.clone(), crowd.clone(), crowd]));
        p.set_escalation(Box::new(SustainedEscalation::new(Duration::ZERO)));

        assert_eq!(p.process(&frame(0)).threat_level, ThreatLevel::Critical);
    }
}
