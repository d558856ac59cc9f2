/// 威胁分级 (Threat classification)
///
/// 分级器: 单周期无状态,按严重度从高到低检查规则,首条命中即为结果;
/// 升级策略: 分级之后的跨周期处理 (即时 / 持续升级)。
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::engine::CrowdMetrics;
use crate::config::{EscalationConfig, EscalationMode, ThreatConfig};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Normal => "NORMAL",
            ThreatLevel::Warning => "WARNING",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分级结果
#[derive(Clone, Debug, PartialEq)]
pub struct Assessment {
    pub level: ThreatLevel,
    pub reason: String,
}

impl Assessment {
    pub fn new(level: ThreatLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: reason.into(),
        }
    }
}

// ========== 分级器 ==========

type Rule = fn(&ThreatConfig, &CrowdMetrics) -> Option<String>;

fn risk_critical(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.risk_score > t.risk_critical).then(|| {
        format!(
            "High crowd risk ({:.0}%): up to {} people per zone, {} opposing-flow zones.",
            m.risk_score * 100.0,
            m.max_density,
            m.conflict_count
        )
    })
}

fn movement_surge(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.chaos_metric > t.chaos_critical && m.moving_count >= t.surge_min_movers).then(|| {
        format!(
            "Sudden movement surge: average speed {:.1} px/cycle across {} moving people.",
            m.chaos_metric, m.moving_count
        )
    })
}

fn density_critical(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.max_density >= t.cell_critical)
        .then(|| format!("Dangerous density: {} people in a single zone.", m.max_density))
}

fn overcrowded(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.person_count > t.crowd_critical)
        .then(|| format!("Overcrowding: {} people in view.", m.person_count))
}

fn risk_warning(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.risk_score > t.risk_warning)
        .then(|| format!("Elevated crowd risk ({:.0}%).", m.risk_score * 100.0))
}

fn unusual_movement(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.chaos_metric > t.chaos_warning)
        .then(|| format!("Unusual movement: average speed {:.1} px/cycle.", m.chaos_metric))
}

fn density_warning(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.max_density >= t.cell_warning)
        .then(|| format!("Crowd building up: {} people in one zone.", m.max_density))
}

fn crowd_warning(t: &ThreatConfig, m: &CrowdMetrics) -> Option<String> {
    (m.person_count > t.crowd_warning)
        .then(|| format!("Large crowd: {} people in view.", m.person_count))
}

/// 规则表,严重度降序
const RULES: &[(ThreatLevel, Rule)] = &[
    (ThreatLevel::Critical, risk_critical),
    (ThreatLevel::Critical, movement_surge),
    (ThreatLevel::Critical, density_critical),
    (ThreatLevel::Critical, overcrowded),
    (ThreatLevel::Warning, risk_warning),
    (ThreatLevel::Warning, unusual_movement),
    (ThreatLevel::Warning, density_warning),
    (ThreatLevel::Warning, crowd_warning),
];

#[derive(Clone, Debug, Default)]
pub struct ThreatClassifier {
    config: ThreatConfig,
}

impl ThreatClassifier {
    pub fn new(config: &ThreatConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn classify(&self, metrics: &CrowdMetrics) -> Assessment {
        for (level, rule) in RULES {
            if let Some(reason) = rule(&self.config, metrics) {
                return Assessment::new(*level, reason);
            }
        }

        let reason = if metrics.person_count == 0 {
            "Clear and orderly flow.".to_string()
        } else {
            format!(
                "Monitoring {} individuals. Behavior is stable.",
                metrics.person_count
            )
        };
        Assessment::new(ThreatLevel::Normal, reason)
    }
}

// ========== 升级策略 ==========

/// 跨周期升级策略,在分级器之后应用
pub trait EscalationPolicy: Send {
    fn apply(&mut self, assessment: Assessment, now: Instant) -> Assessment;

    fn reset(&mut self) {}

    fn name(&self) -> &str;
}

/// 即时策略: 每周期的分级即最终结果
#[derive(Clone, Copy, Debug, Default)]
pub struct Instantaneous;

impl EscalationPolicy for Instantaneous {
    fn apply(&mut self, assessment: Assessment, _now: Instant) -> Assessment {
        assessment
    }

    fn name(&self) -> &str {
        "instant"
    }
}

/// 持续升级: 非 NORMAL 状态持续超过 hold 后, WARNING 提升为 CRITICAL
#[derive(Clone, Debug)]
pub struct SustainedEscalation {
    hold: Duration,
    since: Option<Instant>,
}

impl SustainedEscalation {
    pub fn new(hold: Duration) -> Self {
        Self { hold, since: None }
    }
}

impl EscalationPolicy for SustainedEscalation {
    fn apply(&mut self, assessment: Assessment, now: Instant) -> Assessment {
        if assessment.level == ThreatLevel::Normal {
            self.since = None;
            return assessment;
        }

        let since = *self.since.get_or_insert(now);
        let held = now.saturating_duration_since(since);
        if assessment.level == ThreatLevel::Warning && held >= self.hold {
            return Assessment::new(
                ThreatLevel::Critical,
                format!(
                    "Sustained warning for {:.0}s: {}",
                    held.as_secs_f32(),
                    assessment.reason
                ),
            );
        }
        assessment
    }

    fn reset(&mut self) {
        self.since = None;
    }

    fn name(&self) -> &str {
        "sustained"
    }
}

pub fn escalation_from_config(config: &EscalationConfig) -> Box<dyn EscalationPolicy> {
    match config.mode {
        EscalationMode::Instant => Box::new(Instantaneous),
        EscalationMode::Sustained => Box::new(SustainedEscalation::new(
            Duration::from_secs_f32(config.hold_secs.max(0.0)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ThreatClassifier {
        ThreatClassifier::new(&ThreatConfig::default())
    }

    fn metrics(count: usize, chaos: f32, max_density: u32, risk: f32) -> CrowdMetrics {
        CrowdMetrics {
            person_count: count,
            moving_count: if chaos > 0.0 { count } else { 0 },
            chaos_metric: chaos,
            max_density,
            risk_score: risk,
            ..CrowdMetrics::default()
        }
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(ThreatLevel::Critical > ThreatLevel::Warning);
        assert!(ThreatLevel::Warning > ThreatLevel::Normal);
        assert_eq!(serde_json::to_string(&ThreatLevel::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn test_normal_reasons() {
        let empty = classifier().classify(&CrowdMetrics::default());
        assert_eq!(empty.level, ThreatLevel::Normal);
        assert_eq!(empty.reason, "Clear and orderly flow.");

        let calm = classifier().classify(&metrics(3, 0.0, 1, 0.1));
        assert_eq!(calm.level, ThreatLevel::Normal);
        assert_eq!(calm.reason, "Monitoring 3 individuals. Behavior is stable.");
    }

    #[test]
    fn test_density_critical_is_not_downgraded() {
        // 高密度命中 CRITICAL, 同时也满足多条 WARNING 规则
        let m = metrics(10, 16.0, 9, 0.55);
        let a = classifier().classify(&m);
        assert_eq!(a.level, ThreatLevel::Critical);
        assert!(a.reason.contains("density"), "{}", a.reason);
    }

    #[test]
    fn test_chaos_surge_is_critical() {
        let a = classifier().classify(&metrics(1, 30.0, 1, 0.35));
        assert_eq!(a.level, ThreatLevel::Critical);
        assert!(a.reason.contains("surge"), "{}", a.reason);
    }

    #[test]
    fn test_warning_rules() {
        assert_eq!(classifier().classify(&metrics(2, 0.0, 1, 0.45)).level, ThreatLevel::Warning);
        assert_eq!(classifier().classify(&metrics(2, 18.0, 1, 0.2)).level, ThreatLevel::Warning);
        assert_eq!(classifier().classify(&metrics(5, 0.0, 4, 0.2)).level, ThreatLevel::Warning);
        assert_eq!(classifier().classify(&metrics(9, 0.0, 2, 0.1)).level, ThreatLevel::Warning);
        assert_eq!(classifier().classify(&metrics(13, 0.0, 2, 0.1)).level, ThreatLevel::Critical);
    }

    #[test]
    fn test_instantaneous_is_identity() {
        let a = Assessment::new(ThreatLevel::Warning, "x");
        assert_eq!(Instantaneous.apply(a.clone(), Instant::now()), a);
    }

    #[test]
    fn test_sustained_warning_escalates_after_hold() {
        let mut policy = SustainedEscalation::new(Duration::from_secs(4));
        let t0 = Instant::now();
        let warn = || Assessment::new(ThreatLevel::Warning, "Large crowd");

        assert_eq!(policy.apply(warn(), t0).level, ThreatLevel::Warning);
        assert_eq!(policy.apply(warn(), t0 + Duration::from_secs(3)).level, ThreatLevel::Warning);
        let escalated = policy.apply(warn(), t0 + Duration::from_secs(5));
        assert_eq!(escalated.level, ThreatLevel::Critical);
        assert!(escalated.reason.starts_with("Sustained warning"));

        // NORMAL 重置计时
        let normal = Assessment::new(ThreatLevel::Normal, "ok");
        assert_eq!(policy.apply(normal, t0 + Duration::from_secs(6)).level, ThreatLevel::Normal);
        assert_eq!(policy.apply(warn(), t0 + Duration::from_secs(7)).level, ThreatLevel::Warning);
    }

    #[test]
    fn test_sustained_never_downgrades() {
        let mut policy = SustainedEscalation::new(Duration::ZERO);
        let critical = Assessment::new(ThreatLevel::Critical, "surge");
        assert_eq!(policy.apply(critical.clone(), Instant::now()), critical);
    }
}
