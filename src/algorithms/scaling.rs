/// 坐标缩放 - 把米制坐标映射到显示网格
///
/// grid = floor(value / bound * grid_size)，再钳制到 [0, grid_size - 1]

use crate::algorithms::{GridPosition, ReceiverSet};
use crate::error::ConfigError;

fn scale_axis(value: f64, bound: f64, grid_size: u32) -> u32 {
    let max_cell = grid_size.saturating_sub(1) as i64;
    // NaN 转换为 0，±∞ 饱和到 i64 范围
    let cell = ((value / bound) * grid_size as f64).floor() as i64;
    cell.clamp(0, max_cell) as u32
}

/// 缩放单个坐标点，任何输入都不会越界
pub fn scale(x: f64, y: f64, bound_x: f64, bound_y: f64, grid_size: u32) -> (u32, u32) {
    (
        scale_axis(x, bound_x, grid_size),
        scale_axis(y, bound_y, grid_size),
    )
}

/// 网格缩放器
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridScaler {
    bound_x: f64,
    bound_y: f64,
    grid_size: u32,
}

impl GridScaler {
    pub fn new(bound_x: f64, bound_y: f64, grid_size: u32) -> Result<Self, ConfigError> {
        if grid_size == 0 {
            return Err(ConfigError::InvalidGridSize);
        }
        if !(bound_x.is_finite() && bound_x > 0.0 && bound_y.is_finite() && bound_y > 0.0) {
            return Err(ConfigError::InvalidGridBounds { bound_x, bound_y });
        }
        Ok(GridScaler {
            bound_x,
            bound_y,
            grid_size,
        })
    }

    /// 使用接收器在各轴上的最大坐标作为边界
    pub fn for_receivers(receivers: &ReceiverSet, grid_size: u32) -> Result<Self, ConfigError> {
        let (bound_x, bound_y) = receivers.bounds();
        Self::new(bound_x, bound_y, grid_size)
    }

    pub fn scale(&self, x: f64, y: f64) -> GridPosition {
        let (grid_x, grid_y) = scale(x, y, self.bound_x, self.bound_y, self.grid_size);
        GridPosition { grid_x, grid_y }
    }

    /// 接收器在网格上的位置（显示时标记接收器）
    pub fn receiver_cells(&self, receivers: &ReceiverSet) -> Vec<(u8, GridPosition)> {
        receivers.iter().map(|r| (r.id, self.scale(r.x, r.y))).collect()
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.bound_x, self.bound_y)
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }
}
