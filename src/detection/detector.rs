//! 检测器接口 (Detector)
//! 职责: Frame → 行人检测框; 内部失败时降级为 "无人",不向上抛出

use anyhow::Result;
use tracing::warn;

use super::types::{BBox, RawDetection};
use crate::config::DetectorConfig;
use crate::input::Frame;

/// 目标检测器 Trait
///
/// 模型本身是外部协作者,只要求返回原始检测框。
/// 延迟不设上限: 慢推理只会推迟下一次快照,不会阻塞采集。
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// 闭包即检测器 (便于替换模型或回放)
impl<F> Detector for F
where
    F: FnMut(&Frame) -> Result<Vec<RawDetection>> + Send,
{
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self(frame)
    }
}

/// 类别 + 置信度过滤
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    pub person_class: u32,
    pub min_confidence: f32,
}

impl DetectionFilter {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            person_class: config.person_class,
            min_confidence: config.confidence,
        }
    }

    pub fn accepts(&self, det: &RawDetection) -> bool {
        det.class_id == self.person_class && det.confidence >= self.min_confidence
    }
}

/// 检测结果: 行人框 + 是否发生降级
#[derive(Clone, Debug, Default)]
pub struct PersonDetections {
    pub boxes: Vec<BBox>,
    pub degraded: bool,
}

/// 运行检测器并过滤出行人框 (fail open)
///
/// 检测器报错或输出畸形框时,本周期按 0 检测处理。
pub fn detect_persons(
    detector: &mut dyn Detector,
    filter: &DetectionFilter,
    frame: &Frame,
) -> PersonDetections {
    let raw = match detector.detect(frame) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("❌ {} failed on frame {}: {:#}", detector.name(), frame.frame_id, e);
            return PersonDetections {
                boxes: Vec::new(),
                degraded: true,
            };
        }
    };

    if let Some(bad) = raw.iter().find(|d| !d.bbox.is_well_formed()) {
        warn!(
            "⚠️ {} returned malformed box {:?} on frame {}, treating as no detections",
            detector.name(),
            bad.bbox,
            frame.frame_id
        );
        return PersonDetections {
            boxes: Vec::new(),
            degraded: true,
        };
    }

    PersonDetections {
        boxes: raw
            .into_iter()
            .filter(|d| filter.accepts(d))
            .map(|d| d.bbox)
            .collect(),
        degraded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn filter() -> DetectionFilter {
        DetectionFilter::new(&DetectorConfig::default())
    }

    fn det(class_id: u32, confidence: f32) -> RawDetection {
        RawDetection {
            bbox: BBox::new(0.0, 0.0, 10.0, 20.0),
            class_id,
            confidence,
        }
    }

    #[test]
    fn test_filters_class_and_confidence() {
        let mut detector =
            |_: &Frame| -> Result<Vec<RawDetection>> { Ok(vec![det(0, 0.9), det(0, 0.2), det(2, 0.99), det(0, 0.35)]) };
        let out = detect_persons(&mut detector, &filter(), &Frame::blank(32, 32, 0));
        assert_eq!(out.boxes.len(), 2);
        assert!(!out.degraded);
    }

    #[test]
    fn test_error_fails_open() {
        let mut detector = |_: &Frame| -> Result<Vec<RawDetection>> { Err(anyhow!("model crashed")) };
        let out = detect_persons(&mut detector, &filter(), &Frame::blank(32, 32, 0));
        assert!(out.boxes.is_empty());
        assert!(out.degraded);
    }

    #[test]
    fn test_malformed_output_fails_open() {
        let mut detector = |_: &Frame| -> Result<Vec<RawDetection>> {
            let mut bad = det(0, 0.9);
            bad.bbox.x2 = f32::NAN;
            Ok(vec![det(0, 0.9), bad])
        };
        let out = detect_persons(&mut detector, &filter(), &Frame::blank(32, 32, 0));
        assert!(out.boxes.is_empty());
        assert!(out.degraded);
    }
}
