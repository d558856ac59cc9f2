//! 对向流冲突检测 (Flow conflicts)

use std::collections::BTreeMap;

use super::grid::{DensityGrid, GridCell};
use crate::detection::{Centroid, Direction};

/// 查找冲突单元: 同一单元内任意两人的运动方向余弦 < opposing_cosine
///
/// 长度不超过 `min_magnitude` 的方向向量视为静止,不参与比较;
/// 每个单元至多标记一次,结果按 (行, 列) 升序。
pub fn find_conflicts(
    grid: &DensityGrid,
    movers: &[(Centroid, Direction)],
    opposing_cosine: f32,
    min_magnitude: f32,
) -> Vec<GridCell> {
    let mut by_cell: BTreeMap<GridCell, Vec<Direction>> = BTreeMap::new();
    for (centroid, dir) in movers {
        if dir.magnitude() > min_magnitude {
            by_cell.entry(grid.cell_of(centroid)).or_default().push(*dir);
        }
    }

    by_cell
        .into_iter()
        .filter(|(_, dirs)| has_opposing_pair(dirs, opposing_cosine))
        .map(|(cell, _)| cell)
        .collect()
}

fn has_opposing_pair(dirs: &[Direction], threshold: f32) -> bool {
    dirs.iter().enumerate().any(|(i, a)| {
        dirs[i + 1..]
            .iter()
            .any(|b| a.cosine(b).map_or(false, |cos| cos < threshold))
    })
}
