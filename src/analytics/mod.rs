/// 人群风险分析 (Crowd analytics)
///
/// - Grid:   占用网格密度
/// - Flow:   对向流冲突
/// - Engine: 混乱度 + 加权风险分
/// - Threat: 威胁分级 + 升级策略
pub mod engine;
pub mod flow;
pub mod grid;
pub mod threat;

pub use engine::{AnalyticsEngine, CrowdMetrics, RiskComponents};
pub use flow::find_conflicts;
pub use grid::{DensityGrid, GridCell};
pub use threat::{
    escalation_from_config, Assessment, EscalationPolicy, Instantaneous, SustainedEscalation,
    ThreatClassifier, ThreatLevel,
};
