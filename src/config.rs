//! 引擎配置参数 (Engine configuration)
//!
//! 所有阈值集中在一个可序列化的配置树中,支持 YAML 文件加载,
//! 每个分组都有默认值,文件中只需写出需要覆盖的字段。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 配置校验错误
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("frame size must be non-zero (got {width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("grid must have at least one cell and fit the frame (got {rows}x{cols})")]
    InvalidGrid { rows: usize, cols: usize },
    #[error("{name} must be at least 1")]
    ZeroWindow { name: &'static str },
    #[error("{name} must be positive (got {value})")]
    NonPositiveCap { name: &'static str, value: f32 },
    #[error("risk weights must sum to 1.0 (got {sum:.3})")]
    WeightSum { sum: f32 },
    #[error("{name}: warning threshold {warning} must not exceed critical threshold {critical}")]
    InvertedThreshold {
        name: &'static str,
        warning: f32,
        critical: f32,
    },
    #[error("opposing cosine threshold must lie in [-1, 0) (got {0})")]
    OpposingCosine(f32),
}

// ========== 配置分组 ==========

/// 分析帧尺寸 (采集帧会缩放到该尺寸)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// 密度网格 (R×C)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub rows: usize,
    pub cols: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { rows: 4, cols: 6 }
    }
}

/// 检测器过滤参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// 置信度下限
    pub confidence: f32,
    /// 行人类别 (COCO: 0=person)
    pub person_class: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence: 0.35,
            person_class: 0,
        }
    }
}

/// 质心跟踪器参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// 连续丢失超过该帧数后移除目标
    pub max_disappeared: u32,
    /// 速度滑动窗口容量 W
    pub speed_window: usize,
    /// 最大匹配距离 (像素); None 表示不设上限
    pub max_match_distance: Option<f32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_disappeared: 15,
            speed_window: 10,
            max_match_distance: None,
        }
    }
}

/// 风险评分权重
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskWeights {
    pub density: f32,
    pub conflict: f32,
    pub chaos: f32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            density: 0.4,
            conflict: 0.3,
            chaos: 0.3,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f32 {
        self.density + self.conflict + self.chaos
    }
}

/// 人群指标计算参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// 平滑速度高于此值才算 "移动" (像素/周期)
    pub motion_floor: f32,
    /// 余弦相似度低于此值视为逆向
    pub opposing_cosine: f32,
    /// 方向向量长度低于此值不参与冲突判断
    pub min_flow_magnitude: f32,
    pub density_cap: f32,
    pub conflict_cap: f32,
    pub chaos_cap: f32,
    pub weights: RiskWeights,
    /// 混乱度历史长度
    pub chaos_history: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            motion_floor: 3.0,
            opposing_cosine: -0.7,
            min_flow_magnitude: 2.0,
            density_cap: 8.0,
            conflict_cap: 3.0,
            chaos_cap: 25.0,
            weights: RiskWeights::default(),
            chaos_history: 50,
        }
    }
}

/// 威胁分级阈值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThreatConfig {
    pub risk_critical: f32,
    pub risk_warning: f32,
    pub chaos_critical: f32,
    pub chaos_warning: f32,
    /// 触发速度规则所需的最少移动人数
    pub surge_min_movers: usize,
    /// 单格人数阈值
    pub cell_critical: u32,
    pub cell_warning: u32,
    /// 画面总人数阈值
    pub crowd_critical: usize,
    pub crowd_warning: usize,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            risk_critical: 0.7,
            risk_warning: 0.4,
            chaos_critical: 25.0,
            chaos_warning: 15.0,
            surge_min_movers: 1,
            cell_critical: 8,
            cell_warning: 4,
            crowd_critical: 12,
            crowd_warning: 8,
        }
    }
}

/// 升级策略类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    /// 逐周期即时分级
    #[default]
    Instant,
    /// 持续告警超过 hold_secs 后升级为 CRITICAL
    Sustained,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationConfig {
    pub mode: EscalationMode,
    pub hold_secs: f32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            mode: EscalationMode::Instant,
            hold_secs: 4.0,
        }
    }
}

/// 线程节奏参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 处理线程无新帧时的空转间隔
    pub idle_poll_ms: u64,
    /// 读帧失败后的退避
    pub read_retry_ms: u64,
    /// 打开视频源失败后的退避
    pub open_retry_ms: u64,
    /// 连续读帧失败达到该次数后重新打开视频源
    pub max_read_failures: u32,
    /// 超过该时长无新帧则发布空闲快照
    pub stale_after_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 10,
            read_retry_ms: 10,
            open_retry_ms: 100,
            max_read_failures: 30,
            stale_after_ms: 2000,
        }
    }
}

impl RuntimeConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

// ========== 顶层配置 ==========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub frame: FrameConfig,
    pub grid: GridConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub analytics: AnalyticsConfig,
    pub threat: ThreatConfig,
    pub escalation: EscalationConfig,
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    /// 从 YAML 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let FrameConfig { width, height } = self.frame;
        if width == 0 || height == 0 {
            return Err(ConfigError::EmptyFrame { width, height });
        }

        let GridConfig { rows, cols } = self.grid;
        if rows == 0 || cols == 0 || cols > width as usize || rows > height as usize {
            return Err(ConfigError::InvalidGrid { rows, cols });
        }

        if self.tracker.speed_window == 0 {
            return Err(ConfigError::ZeroWindow {
                name: "tracker.speed_window",
            });
        }
        if self.analytics.chaos_history == 0 {
            return Err(ConfigError::ZeroWindow {
                name: "analytics.chaos_history",
            });
        }

        let a = &self.analytics;
        for (name, value) in [
            ("analytics.density_cap", a.density_cap),
            ("analytics.conflict_cap", a.conflict_cap),
            ("analytics.chaos_cap", a.chaos_cap),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositiveCap { name, value });
            }
        }

        let sum = a.weights.sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(ConfigError::WeightSum { sum });
        }

        if !(-1.0..0.0).contains(&a.opposing_cosine) {
            return Err(ConfigError::OpposingCosine(a.opposing_cosine));
        }

        let t = &self.threat;
        let pairs = [
            ("threat.risk", t.risk_warning, t.risk_critical),
            ("threat.chaos", t.chaos_warning, t.chaos_critical),
            ("threat.cell", t.cell_warning as f32, t.cell_critical as f32),
            ("threat.crowd", t.crowd_warning as f32, t.crowd_critical as f32),
        ];
        for (name, warning, critical) in pairs {
            if warning > critical {
                return Err(ConfigError::InvertedThreshold {
                    name,
                    warning,
                    critical,
                });
            }
        }

        Ok(())
    }

    /// 网格单元尺寸 (像素)
    pub fn cell_size(&self) -> (u32, u32) {
        (
            self.frame.width / self.grid.cols as u32,
            self.frame.height / self.grid.rows as u32,
        )
    }
}
