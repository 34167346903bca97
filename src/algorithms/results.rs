/// 定位结果数据结构
///
/// 包含定位输出的各种信息和元数据

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 米制坐标下的位置估计
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 求解得到的距离偏差 r（米）
    pub bias: f64,
    /// 几何距离误差的均方根（米）
    pub error: f64,
    /// 使用的算法名称
    pub method: String,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

impl PositionEstimate {
    /// 创建新的位置估计
    pub fn new(x: f64, y: f64, bias: f64, error: f64, method: impl Into<String>) -> Self {
        Self::with_timestamp(x, y, bias, error, method, Utc::now())
    }

    /// 创建具有自定义时间戳的结果
    pub fn with_timestamp(
        x: f64,
        y: f64,
        bias: f64,
        error: f64,
        method: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        PositionEstimate {
            x,
            y,
            bias,
            error,
            method: method.into(),
            timestamp,
        }
    }

    /// 与另一结果的 2D 距离
    pub fn distance_to(&self, other: &PositionEstimate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for PositionEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}) m [{}]", self.x, self.y, self.method)
    }
}

/// 网格坐标
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub grid_x: u32,
    pub grid_y: u32,
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.grid_x, self.grid_y)
    }
}

/// 发送给下游消费者的位置更新
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// 单调递增的序号，每次发出更新加 1
    pub seq: u64,
    pub estimate: PositionEstimate,
    pub grid: GridPosition,
    /// 三个接收器的估计距离（米），按接收器编号排序
    pub distances: [f64; 3],
    /// 本次求解失败，沿用上一次有效位置
    pub held: bool,
}

impl PositionUpdate {
    /// 获取详细描述
    pub fn detailed_description(&self) -> String {
        format!(
            "#{} 位置: ({:.2}, {:.2}) m, 网格: {}, 误差: {:.2} m, 偏差: {:.2} m, 方法: {}{}",
            self.seq,
            self.estimate.x,
            self.estimate.y,
            self.grid,
            self.estimate.error,
            self.estimate.bias,
            self.estimate.method,
            if self.held { "（沿用）" } else { "" }
        )
    }
}

impl fmt::Display for PositionUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.seq, self.estimate, self.grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_distance() {
        let a = PositionEstimate::new(0.0, 0.0, 0.0, 0.0, "m");
        let b = PositionEstimate::new(3.0, 4.0, 0.0, 0.0, "m");
        assert_eq!(a.distance_to(&b), 5.0);
    }

    #[test]
    fn test_update_serializes() {
        let update = PositionUpdate {
            seq: 7,
            estimate: PositionEstimate::new(1.0, 2.0, 0.1, 0.05, "least_squares"),
            grid: GridPosition { grid_x: 10, grid_y: 20 },
            distances: [1.0, 2.0, 3.0],
            held: false,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["grid"]["grid_x"], 10);
        assert_eq!(json["estimate"]["method"], "least_squares");
        assert!(update.detailed_description().starts_with("#7"));
    }
}
