//! 多目标质心跟踪 (Centroid multi-object tracking)
//!
//! 每个周期把检测框中心与已有目标做贪心最近邻匹配:
//! - 按目标ID升序处理,保证结果确定
//! - 匹配成功: 更新质心,丢失计数清零,记录位移
//! - 未匹配目标: 丢失计数+1,超过 max_disappeared 后移除
//! - 未匹配检测: 分配新的单调递增ID
//!
//! 默认不设最大匹配距离,稀疏场景下身份可能跨画面 "跳跃"。

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use super::types::{BBox, Centroid, Direction};
use crate::config::TrackerConfig;

// ========== 速度滑动窗口 ==========

/// 定长速度历史 (满后丢弃最旧样本)
#[derive(Clone, Debug)]
pub struct SpeedWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SpeedWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, magnitude: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(magnitude);
    }

    /// 算术平均; 无样本时为 None
    pub fn mean(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.samples.iter()
    }
}

// ========== 跟踪对象 ==========

/// 生命周期状态 (Removed 为终态,不会出现在跟踪表中)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Active,
    Disappearing,
}

/// 跟踪对象
#[derive(Clone, Debug)]
pub struct TrackedObject {
    /// 唯一跟踪ID (进程内不复用)
    pub id: u64,
    pub centroid: Centroid,
    /// 最近一次匹配到的检测框
    pub bbox: BBox,
    /// 连续丢失周期数
    pub disappearance_count: u32,
    pub speed_history: SpeedWindow,
    /// 最近一次匹配时的位移
    pub last_direction: Option<Direction>,
    /// 自创建以来经历的周期数
    pub age: u32,
}

impl TrackedObject {
    fn new(id: u64, bbox: BBox, speed_window: usize) -> Self {
        Self {
            id,
            centroid: bbox.centroid(),
            bbox,
            disappearance_count: 0,
            speed_history: SpeedWindow::new(speed_window),
            last_direction: None,
            age: 0,
        }
    }

    fn matched(&mut self, bbox: BBox) {
        let centroid = bbox.centroid();
        let step = self.centroid.displacement_to(&centroid);
        self.speed_history.push(step.magnitude());
        self.last_direction = Some(step);
        self.centroid = centroid;
        self.bbox = bbox;
        self.disappearance_count = 0;
        self.age += 1;
    }

    fn missed(&mut self) {
        self.disappearance_count += 1;
        self.age += 1;
    }

    pub fn state(&self) -> TrackState {
        if self.disappearance_count == 0 {
            TrackState::Active
        } else {
            TrackState::Disappearing
        }
    }

    /// 平滑速度 (速度窗口均值); 尚无位移样本时为 None
    pub fn smoothed_speed(&self) -> Option<f32> {
        self.speed_history.mean()
    }

    /// 本周期刚匹配且有方向时返回方向向量
    pub fn current_direction(&self) -> Option<Direction> {
        match self.state() {
            TrackState::Active => self.last_direction,
            TrackState::Disappearing => None,
        }
    }
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
///
/// 不同的关联算法都实现此接口,分析引擎只依赖跟踪对象本身
pub trait Tracker: Send {
    /// 用当前帧的检测框更新跟踪器, 返回 id → 质心
    fn update(&mut self, detections: &[BBox]) -> BTreeMap<u64, Centroid>;

    /// 当前所有跟踪对象 (按ID升序)
    fn objects(&self) -> Vec<&TrackedObject>;

    /// 上一次 update 中被移除的ID
    fn last_removed(&self) -> &[u64];

    /// 清除所有跟踪 (ID计数器保留,保证ID不复用)
    fn reset(&mut self);

    /// 当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 质心跟踪器 ==========

pub struct CentroidTracker {
    objects: BTreeMap<u64, TrackedObject>,
    next_id: u64,
    max_disappeared: u32,
    speed_window: usize,
    max_match_distance: Option<f32>,
    last_removed: Vec<u64>,
}

impl CentroidTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 0,
            max_disappeared: config.max_disappeared,
            speed_window: config.speed_window,
            max_match_distance: config.max_match_distance,
            last_removed: Vec::new(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&TrackedObject> {
        self.objects.get(&id)
    }

    fn register(&mut self, bbox: BBox) {
        let id = self.next_id;
        self.next_id += 1;
        self.objects
            .insert(id, TrackedObject::new(id, bbox, self.speed_window));
        debug!("🆕 new track #{}", id);
    }

    fn centroids(&self) -> BTreeMap<u64, Centroid> {
        self.objects
            .iter()
            .map(|(id, obj)| (*id, obj.centroid))
            .collect()
    }
}

impl Tracker for CentroidTracker {
    fn update(&mut self, detections: &[BBox]) -> BTreeMap<u64, Centroid> {
        self.last_removed.clear();

        let centroids: Vec<Centroid> = detections.iter().map(BBox::centroid).collect();
        let mut used = vec![false; detections.len()];

        // 1. 贪心最近邻匹配 (BTreeMap 保证ID升序)
        let mut assignments: Vec<(u64, Option<usize>)> = Vec::with_capacity(self.objects.len());
        for (id, obj) in &self.objects {
            let mut best: Option<(usize, f32)> = None;
            for (j, c) in centroids.iter().enumerate() {
                if used[j] {
                    continue;
                }
                let dist = obj.centroid.distance(c);
                if let Some(limit) = self.max_match_distance {
                    if dist > limit {
                        continue;
                    }
                }
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((j, dist));
                }
            }
            if let Some((j, _)) = best {
                used[j] = true;
            }
            assignments.push((*id, best.map(|(j, _)| j)));
        }

        // 2. 更新已匹配 / 老化未匹配
        for (id, matched) in assignments {
            let Some(obj) = self.objects.get_mut(&id) else {
                continue;
            };
            match matched {
                Some(j) => obj.matched(detections[j]),
                None => {
                    obj.missed();
                    if obj.disappearance_count > self.max_disappeared {
                        self.objects.remove(&id);
                        self.last_removed.push(id);
                        debug!("🗑️ track #{} removed", id);
                    }
                }
            }
        }

        // 3. 未匹配检测 → 新目标
        for (j, bbox) in detections.iter().enumerate() {
            if !used[j] {
                self.register(*bbox);
            }
        }

        self.centroids()
    }

    fn objects(&self) -> Vec<&TrackedObject> {
        self.objects.values().collect()
    }

    fn last_removed(&self) -> &[u64] {
        &self.last_removed
    }

    fn reset(&mut self) {
        self.objects.clear();
        self.last_removed.clear();
    }

    fn track_count(&self) -> usize {
        self.objects.len()
    }
}

// ========== 工具函数 ==========

/// 根据ID生成不同颜色
pub fn id_to_color(id: u64) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
