/// 分析流水线 (Analytics pipeline)
///
/// 双线程架构,通过最新帧槽位和快照发布者通信:
/// - Capture:    视频采集 (独立线程,摄像头帧率)
/// - Processing: 检测 → 跟踪 → 分析 → 分级 (独立线程,检测器节奏)
/// - Consumers:  读取最新快照 / 叠加帧 (任意线程)
pub mod engine;
pub mod overlay;
pub mod processor;
pub mod snapshot;

pub use engine::CrowdEngine;
pub use overlay::annotate;
pub use processor::Processor;
pub use snapshot::{ObjectView, PublishedMetrics, RiskSnapshot, SnapshotPublisher};
