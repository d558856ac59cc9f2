/// 检测系统 (Detection System)
///
/// 处理线程内使用,负责单帧感知与跨帧身份
/// - Detector:  行人检测 (外部模型,失败降级)
/// - Tracker:   质心跟踪 (贪心最近邻 + 丢失容忍)
/// - Simulated: 随机游走人群 (演示/联调)
pub mod detector;
pub mod simulated;
pub mod tracker;
pub mod types;

pub use detector::{detect_persons, DetectionFilter, Detector, PersonDetections};
pub use simulated::SimulatedCrowd;
pub use tracker::{CentroidTracker, SpeedWindow, TrackState, TrackedObject, Tracker};
pub use types::{BBox, Centroid, Direction, RawDetection};
