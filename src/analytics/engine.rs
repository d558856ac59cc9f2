//! 风险分析引擎 (Analytics engine)
//!
//! 每个跟踪周期运行一次: 速度/混乱度 → 网格密度 → 对向流冲突 → 加权风险分

use std::collections::VecDeque;

use serde::Serialize;

use super::flow::find_conflicts;
use super::grid::{DensityGrid, GridCell};
use crate::config::{AnalyticsConfig, FrameConfig, GridConfig};
use crate::detection::TrackedObject;

/// 风险分三个分项,均已钳制到 [0, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RiskComponents {
    pub density: f32,
    pub conflict: f32,
    pub chaos: f32,
}

/// 单周期人群指标
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrowdMetrics {
    pub person_count: usize,
    pub moving_count: usize,
    pub chaos_metric: f32,
    pub max_density: u32,
    pub conflict_count: usize,
    pub conflict_cells: Vec<GridCell>,
    pub density: Vec<Vec<u32>>,
    pub risk_score: f32,
    pub components: RiskComponents,
}

fn clamp_ratio(value: f32, cap: f32) -> f32 {
    (value / cap).clamp(0.0, 1.0)
}

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    grid: DensityGrid,
    chaos_history: VecDeque<f32>,
}

impl AnalyticsEngine {
    pub fn new(config: &AnalyticsConfig, grid: &GridConfig, frame: &FrameConfig) -> Self {
        Self {
            config: config.clone(),
            grid: DensityGrid::new(grid, frame),
            chaos_history: VecDeque::with_capacity(config.chaos_history),
        }
    }

    pub fn grid(&self) -> &DensityGrid {
        &self.grid
    }

    /// 混乱度历史 (旧 → 新)
    pub fn chaos_history(&self) -> Vec<f32> {
        self.chaos_history.iter().copied().collect()
    }

    /// 加权风险分及其分项
    pub fn risk_score(&self, max_density: u32, conflict_count: usize, chaos: f32) -> (f32, RiskComponents) {
        let c = &self.config;
        let components = RiskComponents {
            density: clamp_ratio(max_density as f32, c.density_cap),
            conflict: clamp_ratio(conflict_count as f32, c.conflict_cap),
            chaos: clamp_ratio(chaos, c.chaos_cap),
        };
        let score = c.weights.density * components.density
            + c.weights.conflict * components.conflict
            + c.weights.chaos * components.chaos;
        (score.clamp(0.0, 1.0), components)
    }

    /// 分析当前跟踪对象集合
    pub fn analyze(&mut self, objects: &[&TrackedObject]) -> CrowdMetrics {
        // 速度: 只统计平滑速度超过运动下限的对象
        let moving: Vec<f32> = objects
            .iter()
            .filter_map(|o| o.smoothed_speed())
            .filter(|&speed| speed > self.config.motion_floor)
            .collect();
        let chaos_metric = if moving.is_empty() {
            0.0
        } else {
            moving.iter().sum::<f32>() / moving.len() as f32
        };

        self.grid.rebuild(objects.iter().map(|o| &o.centroid));
        let max_density = self.grid.max();

        let movers: Vec<_> = objects
            .iter()
            .filter_map(|o| o.current_direction().map(|d| (o.centroid, d)))
            .collect();
        let conflict_cells = find_conflicts(
            &self.grid,
            &movers,
            self.config.opposing_cosine,
            self.config.min_flow_magnitude,
        );

        let (risk_score, components) = self.risk_score(max_density, conflict_cells.len(), chaos_metric);

        if self.chaos_history.len() >= self.config.chaos_history {
            self.chaos_history.pop_front();
        }
        self.chaos_history.push_back(chaos_metric);

        CrowdMetrics {
            person_count: objects.len(),
            moving_count: moving.len(),
            chaos_metric,
            max_density,
            conflict_count: conflict_cells.len(),
            conflict_cells,
            density: self.grid.matrix(),
            risk_score,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::detection::{BBox, CentroidTracker, Centroid, Tracker};
    use approx::assert_relative_eq;

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(
            &AnalyticsConfig::default(),
            &GridConfig::default(),
            &FrameConfig::default(),
        )
    }

    fn at(x: f32, y: f32) -> BBox {
        BBox::around(Centroid::new(x, y), 20.0, 40.0)
    }

    fn analyze(engine: &mut AnalyticsEngine, tracker: &CentroidTracker) -> CrowdMetrics {
        let objects = tracker.objects();
        engine.analyze(&objects)
    }

    #[test]
    fn test_empty_scene_is_calm() {
        let mut e = engine();
        let m = e.analyze(&[]);
        assert_eq!(m.person_count, 0);
        assert_eq!(m.max_density, 0);
        assert_eq!(m.chaos_metric, 0.0);
        assert_eq!(m.risk_score, 0.0);
        assert_eq!(e.chaos_history(), vec![0.0]);
    }

    #[test]
    fn test_opposing_pair_in_one_cell_is_a_conflict() {
        let mut tracker = CentroidTracker::new(&TrackerConfig::default());
        tracker.update(&[at(40.0, 50.0), at(90.0, 60.0)]);
        // 两人在同一单元内相向移动: (5,0) 与 (-5,0)
        tracker.update(&[at(45.0, 50.0), at(85.0, 60.0)]);

        let m = analyze(&mut engine(), &tracker);
        assert_eq!(m.conflict_count, 1);
        assert_eq!(m.conflict_cells, vec![GridCell::new(0, 0)]);
        assert_relative_eq!(m.components.conflict, 1.0 / 3.0);
    }

    #[test]
    fn test_density_component_saturates() {
        let mut tracker = CentroidTracker::new(&TrackerConfig::default());
        let packed: Vec<BBox> = (0..16).map(|i| at(10.0 + i as f32 * 5.0, 60.0)).collect();
        tracker.update(&packed);

        let mut e = engine();
        let m = analyze(&mut e, &tracker);
        assert_eq!(m.max_density, 16);
        assert_relative_eq!(m.components.density, 1.0);

        let (_, denser) = e.risk_score(20, 0, 0.0);
        assert_relative_eq!(denser.density, 1.0);
        let (score, _) = e.risk_score(200, 0, 0.0);
        assert_relative_eq!(score, 0.4);
    }

    #[test]
    fn test_risk_is_monotonic_in_each_input() {
        let e = engine();
        let base = e.risk_score(3, 1, 10.0).0;
        for step in 1..40 {
            let s = step as f32;
            assert!(e.risk_score(3 + step, 1, 10.0).0 >= base);
            assert!(e.risk_score(3, 1 + step as usize, 10.0).0 >= base);
            assert!(e.risk_score(3, 1, 10.0 + s).0 >= base);
        }
        assert_relative_eq!(e.risk_score(100, 100, 1000.0).0, 1.0);
    }

    #[test]
    fn test_chaos_only_counts_movers() {
        let mut tracker = CentroidTracker::new(&TrackerConfig::default());
        tracker.update(&[at(100.0, 100.0), at(400.0, 300.0)]);
        // 一人每周期移动 10 像素,另一人只抖动 1 像素
        tracker.update(&[at(110.0, 100.0), at(401.0, 300.0)]);

        let m = analyze(&mut engine(), &tracker);
        assert_eq!(m.person_count, 2);
        assert_eq!(m.moving_count, 1);
        assert_relative_eq!(m.chaos_metric, 10.0);
    }

    #[test]
    fn test_chaos_history_is_bounded() {
        let config = AnalyticsConfig {
            chaos_history: 3,
            ..AnalyticsConfig::default()
        };
        let mut e = AnalyticsEngine::new(&config, &GridConfig::default(), &FrameConfig::default());
        for _ in 0..10 {
            e.analyze(&[]);
        }
        assert_eq!(e.chaos_history().len(), 3);
    }
}
