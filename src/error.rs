/// 错误类型定义
///
/// 按照处理策略划分：
/// - `ConfigError`：构造期致命错误，管线不会启动
/// - `SolverError`：单次 tick 的暂时性失败，沿用上一次有效位置
/// - `IngestError`：无效的输入事件，丢弃并记录日志
/// - `SinkError`：下游消费者故障，按消费者隔离

use thiserror::Error;

/// 配置错误（构造期检查）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("需要 {expected} 个接收器，实际配置了 {found} 个")]
    ReceiverCount { expected: usize, found: usize },

    #[error("接收器编号 {0} 无效（应为 1..=3）")]
    InvalidReceiverId(u8),

    #[error("接收器编号 {0} 重复")]
    DuplicateReceiver(u8),

    #[error("接收器 {id} 的坐标不是有限值: ({x}, {y})")]
    InvalidCoordinate { id: u8, x: f64, y: f64 },

    #[error("参考功率不是有限值: {0}")]
    InvalidReferencePower(f64),

    #[error("路径损耗指数必须为正数，当前为 {0}")]
    InvalidPathLossExponent(f64),

    #[error("滤波器参数 {name} 无效: {value}")]
    InvalidFilterParameter { name: &'static str, value: f64 },

    #[error("历史缓冲容量必须大于 0")]
    InvalidHistoryCapacity,

    #[error("定位周期必须大于 0 毫秒")]
    InvalidTickInterval,

    #[error("网格尺寸必须大于 0")]
    InvalidGridSize,

    #[error("网格边界必须为正数: ({bound_x}, {bound_y})")]
    InvalidGridBounds { bound_x: f64, bound_y: f64 },

    #[error("求解器参数无效: {0}")]
    InvalidSolver(String),

    #[error("队列容量必须大于 0: {0}")]
    InvalidQueueCapacity(&'static str),

    #[error("主题格式无效: {0}")]
    InvalidTopicPattern(String),
}

/// 三边定位求解失败
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("接收器几何退化（近似共线），无法定位")]
    DegenerateGeometry,

    #[error("法方程奇异（第 {iteration} 次迭代）")]
    Singular { iteration: usize },

    #[error("迭代 {iterations} 次后未收敛，残差平方和 {cost:.3e}")]
    NotConverged { iterations: usize, cost: f64 },

    #[error("圆 1 与圆 2 无交点（圆心距 {separation:.3} m，半径 {r1:.3} / {r2:.3} m）")]
    NoIntersection { separation: f64, r1: f64, r2: f64 },

    #[error("输入或结果不是有限值")]
    NonFinite,
}

/// 输入事件错误（丢弃，不中断管线）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("未知接收器编号 {0}")]
    UnknownReceiver(u8),

    #[error("无法识别的主题: {0}")]
    UnknownTopic(String),

    #[error("消息解析失败: {0}")]
    MalformedPayload(String),

    #[error("时间戳格式无效: {0}")]
    InvalidTimestamp(String),

    #[error("RSSI 超出范围: {0} dBm")]
    RssiOutOfRange(i64),

    #[error("输入队列已满")]
    QueueFull,

    #[error("管线已停止，不再接收数据")]
    Stopped,
}

/// 下游消费者错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("消费者 {sink} 处理失败: {reason}")]
    Failed { sink: String, reason: String },

    #[error("消费者 {0} 在处理时崩溃")]
    Panicked(String),

    #[error("消费者 {0} 已关闭")]
    Closed(String),
}

impl SinkError {
    pub fn failed(sink: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }
}

/// crate 级错误
#[derive(Debug, Error)]
pub enum Error {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("定位失败: {0}")]
    Solver(#[from] SolverError),

    #[error("输入错误: {0}")]
    Ingest(#[from] IngestError),

    #[error("输出错误: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("后台任务异常退出: {0}")]
    Task(String),

    #[error("参数错误: {0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
