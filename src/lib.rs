/// 蓝牙信标室内定位
///
/// 三个固定接收器上报信标的 RSSI，管线对每个接收器单独做卡尔曼滤波，
/// 按路径损耗模型换算距离，周期性地三边定位并把结果缩放到显示网格。

pub mod algorithms;
pub mod channel;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod positioning;
#[cfg(feature = "ble")]
pub mod scanner;
pub mod sink;

pub use algorithms::{GridPosition, PositionEstimate, PositionUpdate};
pub use channel::{RawSample, SampleRecord};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use positioning::{EventSender, Pipeline, PipelineHandle, PipelineState, PipelineStats};
pub use sink::{PositionSink, QueuedSink};
