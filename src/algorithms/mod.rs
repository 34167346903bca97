/// 定位算法模块
///
/// 该模块提供 RSSI 定位的各个计算环节：
/// - RSSI 转距离（对数路径损耗模型）
/// - 单通道卡尔曼滤波
/// - 三边定位（最小二乘、两圆交点、线性化）
/// - 显示网格缩放

pub mod kalman;
pub mod receiver;
pub mod results;
pub mod rssi_model;
pub mod scaling;
pub mod trilateration;

pub use kalman::*;
pub use receiver::*;
pub use results::*;
pub use rssi_model::*;
pub use scaling::*;
pub use trilateration::*;
