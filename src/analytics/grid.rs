/// 占用网格 (Occupancy grid)
///
/// 尺寸在构造时固定; 每个分析周期整体重建,不做增量更新。
use serde::Serialize;

use crate::config::{FrameConfig, GridConfig};
use crate::detection::Centroid;

/// 网格单元索引 (行, 列)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

#[derive(Clone, Debug)]
pub struct DensityGrid {
    rows: usize,
    cols: usize,
    cell_w: u32,
    cell_h: u32,
    counts: Vec<u32>,
}

impl DensityGrid {
    pub fn new(grid: &GridConfig, frame: &FrameConfig) -> Self {
        let rows = grid.rows.max(1);
        let cols = grid.cols.max(1);
        Self {
            rows,
            cols,
            cell_w: (frame.width / cols as u32).max(1),
            cell_h: (frame.height / rows as u32).max(1),
            counts: vec![0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cell_size(&self) -> (u32, u32) {
        (self.cell_w, self.cell_h)
    }

    /// 坐标 → 单元: 整数除以单元尺寸,越界钳制到边缘单元
    pub fn cell_of(&self, c: &Centroid) -> GridCell {
        let col = (c.x.max(0.0) as u32 / self.cell_w) as usize;
        let row = (c.y.max(0.0) as u32 / self.cell_h) as usize;
        GridCell {
            row: row.min(self.rows - 1),
            col: col.min(self.cols - 1),
        }
    }

    /// 从零重建密度矩阵
    pub fn rebuild<'a>(&mut self, centroids: impl IntoIterator<Item = &'a Centroid>) {
        self.counts.iter_mut().for_each(|n| *n = 0);
        for c in centroids {
            let cell = self.cell_of(c);
            self.counts[cell.row * self.cols + cell.col] += 1;
        }
    }

    pub fn count(&self, cell: GridCell) -> u32 {
        self.counts
            .get(cell.row * self.cols + cell.col)
            .copied()
            .unwrap_or(0)
    }

    /// 单元最大人数 (无人时为 0)
    pub fn max(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn matrix(&self) -> Vec<Vec<u32>> {
        self.counts.chunks(self.cols).map(|row| row.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> DensityGrid {
        DensityGrid::new(&GridConfig::default(), &FrameConfig::default())
    }

    #[test]
    fn test_cell_size_uses_integer_division() {
        assert_eq!(grid().cell_size(), (106, 120));
    }

    #[test]
    fn test_cell_mapping_clamps_to_bounds() {
        let g = grid();
        assert_eq!(g.cell_of(&Centroid::new(0.0, 0.0)), GridCell::new(0, 0));
        assert_eq!(g.cell_of(&Centroid::new(105.9, 119.9)), GridCell::new(0, 0));
        assert_eq!(g.cell_of(&Centroid::new(106.0, 120.0)), GridCell::new(1, 1));
        // 636/106 = 6 → 钳制到最后一列
        assert_eq!(g.cell_of(&Centroid::new(639.0, 479.0)), GridCell::new(3, 5));
        assert_eq!(g.cell_of(&Centroid::new(-20.0, 9000.0)), GridCell::new(3, 0));
    }

    #[test]
    fn test_rebuild_replaces_previous_counts() {
        let mut g = grid();
        let first = [Centroid::new(10.0, 10.0), Centroid::new(20.0, 20.0)];
        g.rebuild(first.iter());
        assert_eq!(g.count(GridCell::new(0, 0)), 2);
        assert_eq!(g.max(), 2);

        g.rebuild([Centroid::new(300.0, 300.0)].iter());
        assert_eq!(g.count(GridCell::new(0, 0)), 0);
        assert_eq!(g.max(), 1);

        g.rebuild(std::iter::empty());
        assert_eq!(g.max(), 0);
        assert_eq!(g.matrix().len(), 4);
        assert!(g.matrix().iter().all(|row| row.len() == 6));
    }
}
