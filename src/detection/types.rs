/// 检测系统数据结构定义
/// Data structures for the detection system
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 质心 / 二维点 (像素坐标)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: &Centroid) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 位移向量 self → to
    pub fn displacement_to(&self, to: &Centroid) -> Direction {
        Direction {
            dx: to.x - self.x,
            dy: to.y - self.y,
        }
    }
}

/// 运动方向向量 (dx, dy), 单位: 像素/周期
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub dx: f32,
    pub dy: f32,
}

impl Direction {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    pub fn magnitude(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }

    /// 余弦相似度; 任一向量长度为0时返回 None
    pub fn cosine(&self, other: &Direction) -> Option<f32> {
        let m1 = self.magnitude();
        let m2 = other.magnitude();
        if m1 < f32::EPSILON || m2 < f32::EPSILON {
            return None;
        }
        let dot = self.dx * other.dx + self.dy * other.dy;
        Some((dot / (m1 * m2)).clamp(-1.0, 1.0))
    }
}

/// 检测框 (Detection bounding box), 行人类别隐含
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 以中心点和尺寸构造
    pub fn around(center: Centroid, width: f32, height: f32) -> Self {
        Self {
            x1: center.x - width / 2.0,
            y1: center.y - height / 2.0,
            x2: center.x + width / 2.0,
            y2: center.y + height / 2.0,
        }
    }

    /// 获取中心点
    pub fn centroid(&self) -> Centroid {
        Centroid::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 坐标有限且未倒置
    pub fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 >= self.x1
            && self.y2 >= self.y1
    }
}

/// 检测器原始输出 (过滤前)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: BBox,
    pub class_id: u32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn person(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            class_id: 0,
            confidence,
        }
    }
}
