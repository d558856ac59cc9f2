//! 模拟人群检测器 (Simulated crowd)
//!
//! 没有真实模型时用随机游走生成行人框,供演示程序和联调使用。

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::detector::Detector;
use super::types::{BBox, Centroid, RawDetection};
use crate::input::Frame;

const PERSON_W: f32 = 28.0;
const PERSON_H: f32 = 64.0;

#[derive(Clone, Debug)]
struct Walker {
    pos: Centroid,
    vel: (f32, f32),
}

pub struct SimulatedCrowd {
    walkers: Vec<Walker>,
    rng: StdRng,
    /// 平均步长 (像素/次检测)
    speed: f32,
    /// 每次检测漏检某人的概率
    miss_rate: f64,
}

impl SimulatedCrowd {
    pub fn new(people: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let walkers = (0..people)
            .map(|_| Walker {
                pos: Centroid::new(rng.gen_range(40.0..600.0), rng.gen_range(60.0..420.0)),
                vel: (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
            })
            .collect();
        Self {
            walkers,
            rng,
            speed: 2.0,
            miss_rate: 0.05,
        }
    }

    /// 调整步长 (模拟人群骚动)
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.max(0.0);
    }

    fn step(&mut self, width: f32, height: f32) {
        for w in &mut self.walkers {
            w.vel.0 = (w.vel.0 + self.rng.gen_range(-0.3..0.3)).clamp(-1.0, 1.0);
            w.vel.1 = (w.vel.1 + self.rng.gen_range(-0.3..0.3)).clamp(-1.0, 1.0);
            let mut x = w.pos.x + w.vel.0 * self.speed;
            let mut y = w.pos.y + w.vel.1 * self.speed;

            // 碰到边界反弹
            if x < PERSON_W / 2.0 || x > width - PERSON_W / 2.0 {
                w.vel.0 = -w.vel.0;
                x = x.clamp(PERSON_W / 2.0, (width - PERSON_W / 2.0).max(PERSON_W / 2.0));
            }
            if y < PERSON_H / 2.0 || y > height - PERSON_H / 2.0 {
                w.vel.1 = -w.vel.1;
                y = y.clamp(PERSON_H / 2.0, (height - PERSON_H / 2.0).max(PERSON_H / 2.0));
            }
            w.pos = Centroid::new(x, y);
        }
    }
}

impl Detector for SimulatedCrowd {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.step(frame.width() as f32, frame.height() as f32);

        let mut out = Vec::with_capacity(self.walkers.len() + 1);
        for i in 0..self.walkers.len() {
            if self.rng.gen_bool(self.miss_rate) {
                continue;
            }
            let pos = self.walkers[i].pos;
            let confidence = self.rng.gen_range(0.4..0.95);
            out.push(RawDetection::person(
                BBox::around(pos, PERSON_W, PERSON_H),
                confidence,
            ));
        }

        // 偶发的非行人/低置信度干扰框
        if self.rng.gen_bool(0.2) {
            out.push(RawDetection {
                bbox: BBox::new(5.0, 5.0, 40.0, 30.0),
                class_id: 56, // chair
                confidence: 0.8,
            });
        }
        if self.rng.gen_bool(0.2) {
            out.push(RawDetection::person(BBox::new(300.0, 200.0, 320.0, 240.0), 0.1));
        }

        Ok(out)
    }

    fn name(&self) -> &str {
        "simulated-crowd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_inside_frame() {
        let mut crowd = SimulatedCrowd::new(10, 1);
        crowd.set_speed(40.0);
        let frame = Frame::blank(640, 480, 0);
        for _ in 0..200 {
            for d in crowd.detect(&frame).unwrap() {
                let c = d.bbox.centroid();
                assert!((0.0..=640.0).contains(&c.x));
                assert!((0.0..=480.0).contains(&c.y));
            }
        }
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let frame = Frame::blank(640, 480, 0);
        let mut a = SimulatedCrowd::new(5, 42);
        let mut b = SimulatedCrowd::new(5, 42);
        assert_eq!(a.detect(&frame).unwrap(), b.detect(&frame).unwrap());
    }
}
