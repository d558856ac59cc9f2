//! 叠加渲染 (Overlay)
//! 在帧副本上绘制: 密度网格、检测框、质心与方向箭头、冲突圈、告警横幅

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut,
    draw_line_segment_mut,
};
use imageproc::rect::Rect;

use crate::analytics::ThreatLevel;
use crate::config::EngineConfig;
use crate::detection::tracker::id_to_color;
use crate::detection::TrackState;
use crate::pipeline::snapshot::RiskSnapshot;

const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
const RED: Rgb<u8> = Rgb([230, 0, 0]);
const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
const GRID_LINE: Rgb<u8> = Rgb([80, 80, 80]);
const GREY: Rgb<u8> = Rgb([150, 150, 150]);

const TINT_ALPHA: f32 = 0.25;
const BANNER_HEIGHT: u32 = 24;
const ARROW_SCALE: f32 = 3.0;

fn threat_color(level: ThreatLevel) -> Rgb<u8> {
    match level {
        ThreatLevel::Normal => GREEN,
        ThreatLevel::Warning => ORANGE,
        ThreatLevel::Critical => RED,
    }
}

/// 半透明填充矩形区域
fn tint(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>, alpha: f32) {
    let x1 = (x0 + w).min(img.width());
    let y1 = (y0 + h).min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let p = img.get_pixel_mut(x, y);
            for c in 0..3 {
                p[c] = (p[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha).round() as u8;
            }
        }
    }
}

fn rect(x: f32, y: f32, w: f32, h: f32) -> Rect {
    Rect::at(x.round() as i32, y.round() as i32).of_size(w.round().max(1.0) as u32, h.round().max(1.0) as u32)
}

/// 生成叠加帧 (不修改输入)
pub fn annotate(frame: &RgbImage, snapshot: &RiskSnapshot, config: &EngineConfig) -> RgbImage {
    let mut img = frame.clone();
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img;
    }

    // 快照按配置尺寸计算,画面尺寸不同时按比例映射
    let sx = w as f32 / config.frame.width as f32;
    let sy = h as f32 / config.frame.height as f32;
    let (cell_w, cell_h) = config.cell_size();
    let (cw, ch) = (cell_w as f32 * sx, cell_h as f32 * sy);

    // 1. 密度网格
    for (row, counts) in snapshot.density.iter().enumerate() {
        for (col, &n) in counts.iter().enumerate() {
            let (x, y) = (col as f32 * cw, row as f32 * ch);
            if n > 0 {
                let color = if n >= config.threat.cell_critical {
                    RED
                } else if n >= config.threat.cell_warning {
                    ORANGE
                } else {
                    GREEN
                };
                tint(&mut img, x as u32, y as u32, cw as u32, ch as u32, color, TINT_ALPHA);
            }
            draw_hollow_rect_mut(&mut img, rect(x, y, cw, ch), GRID_LINE);
        }
    }

    // 2. 冲突单元
    for cell in &snapshot.conflict_cells {
        let cx = (cell.col as f32 + 0.5) * cw;
        let cy = (cell.row as f32 + 0.5) * ch;
        let r = (cw.min(ch) / 2.0) as i32;
        draw_hollow_circle_mut(&mut img, (cx as i32, cy as i32), r, MAGENTA);
        draw_hollow_circle_mut(&mut img, (cx as i32, cy as i32), (r - 1).max(1), MAGENTA);
    }

    // 3. 跟踪对象
    let box_color = threat_color(snapshot.threat_level);
    for o in &snapshot.objects {
        let b = &o.bbox;
        let color = match o.state {
            TrackState::Active => box_color,
            TrackState::Disappearing => GREY,
        };
        draw_hollow_rect_mut(
            &mut img,
            rect(b.x1 * sx, b.y1 * sy, b.width() * sx, b.height() * sy),
            color,
        );

        let (cx, cy) = (o.centroid.x * sx, o.centroid.y * sy);
        let (r, g, bl) = id_to_color(o.id);
        draw_filled_circle_mut(&mut img, (cx as i32, cy as i32), 3, Rgb([r, g, bl]));

        if let Some(d) = o.direction {
            let tip = (cx + d.dx * ARROW_SCALE * sx, cy + d.dy * ARROW_SCALE * sy);
            draw_line_segment_mut(&mut img, (cx, cy), tip, color);
            draw_filled_circle_mut(&mut img, (tip.0 as i32, tip.1 as i32), 2, color);
        }
    }

    // 4. 告警横幅
    if snapshot.risk_score > config.threat.risk_warning {
        let banner = Rect::at(0, 0).of_size(w, BANNER_HEIGHT.min(h));
        draw_filled_rect_mut(&mut img, banner, RED);
    }

    img
}
