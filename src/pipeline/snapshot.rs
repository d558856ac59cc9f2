//! 风险快照与发布 (Risk snapshot & publisher)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::analytics::{GridCell, RiskComponents, ThreatLevel};
use crate::detection::{BBox, Centroid, Direction, TrackState};

// ========== 快照 ==========

/// 单个跟踪对象的只读视图
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectView {
    pub id: u64,
    pub centroid: Centroid,
    pub bbox: BBox,
    pub direction: Option<Direction>,
    pub speed: f32,
    pub state: TrackState,
}

/// 风险快照: 一次完整的分析结果,整体替换,读者拿到的永远是完整一份
#[derive(Clone, Debug, Serialize)]
pub struct RiskSnapshot {
    pub frame_id: Option<u64>,
    pub updated_at: DateTime<Local>,
    pub person_count: usize,
    pub chaos_metric: f32,
    pub risk_score: f32,
    pub conflict_count: usize,
    pub max_density: u32,
    pub threat_level: ThreatLevel,
    pub reason: String,
    pub chaos_history: Vec<f32>,
    pub density: Vec<Vec<u32>>,
    pub conflict_cells: Vec<GridCell>,
    pub objects: Vec<ObjectView>,
    pub risk_components: RiskComponents,
    pub inference_ms: f64,
    pub processing_fps: f64,
    /// 本周期检测器失败,按无人处理
    pub degraded: bool,
}

impl RiskSnapshot {
    /// 无人 / 无画面时的 NORMAL 快照
    pub fn idle(reason: impl Into<String>) -> Self {
        Self {
            frame_id: None,
            updated_at: Local::now(),
            person_count: 0,
            chaos_metric: 0.0,
            risk_score: 0.0,
            conflict_count: 0,
            max_density: 0,
            threat_level: ThreatLevel::Normal,
            reason: reason.into(),
            chaos_history: Vec::new(),
            density: Vec::new(),
            conflict_cells: Vec::new(),
            objects: Vec::new(),
            risk_components: RiskComponents::default(),
            inference_ms: 0.0,
            processing_fps: 0.0,
            degraded: false,
        }
    }

    pub fn metrics(&self) -> PublishedMetrics {
        PublishedMetrics::from(self)
    }
}

impl Default for RiskSnapshot {
    fn default() -> Self {
        Self::idle("Waiting for video.")
    }
}

// ========== 对外指标 ==========

fn round_to(value: f32, decimals: i32) -> f32 {
    let scale = 10f32.powi(decimals);
    (value * scale).round() / scale
}

/// 对外发布的指标 (JSON, camelCase)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMetrics {
    pub count: usize,
    pub chaos: f32,
    pub threat: ThreatLevel,
    pub reason: String,
    pub conflicts: usize,
    pub max_density: u32,
    /// 0-100
    pub risk_score: f32,
    pub history: Vec<f32>,
}

impl From<&RiskSnapshot> for PublishedMetrics {
    fn from(s: &RiskSnapshot) -> Self {
        Self {
            count: s.person_count,
            chaos: round_to(s.chaos_metric, 2),
            threat: s.threat_level,
            reason: s.reason.clone(),
            conflicts: s.conflict_count,
            max_density: s.max_density,
            risk_score: round_to(s.risk_score * 100.0, 1),
            history: s.chaos_history.iter().map(|&c| round_to(c, 2)).collect(),
        }
    }
}

// ========== 发布者 ==========

/// 快照发布者: 写者整体替换 Arc,读者克隆 Arc 后在锁外读取
pub struct SnapshotPublisher {
    current: RwLock<Arc<RiskSnapshot>>,
    version: AtomicU64,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new(RiskSnapshot::default())
    }
}

impl SnapshotPublisher {
    pub fn new(initial: RiskSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            version: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, snapshot: RiskSnapshot) {
        let next = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn latest(&self) -> Arc<RiskSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics(&self) -> PublishedMetrics {
        self.latest().metrics()
    }

    /// 已发布次数
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
