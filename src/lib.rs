pub mod analytics; // 人群风险分析与威胁分级
pub mod config; // 引擎配置参数
pub mod detection; // 行人检测与跟踪
pub mod input; // 视频输入系统
pub mod pipeline; // 采集/处理流水线与快照发布

pub use crate::analytics::{
    Assessment, CrowdMetrics, EscalationPolicy, Instantaneous, SustainedEscalation,
    ThreatClassifier, ThreatLevel,
};
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::detection::{
    BBox, CentroidTracker, Centroid, Detector, Direction, RawDetection, SimulatedCrowd,
    TrackedObject, Tracker,
};
pub use crate::input::{
    DirectoryOpener, Frame, FrameSource, ImageSequenceSource, SourceOpener, SyntheticOpener,
};
pub use crate::pipeline::{CrowdEngine, PublishedMetrics, RiskSnapshot, SnapshotPublisher};
