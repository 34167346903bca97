/// 管线配置
///
/// 所有字段都有默认值（对应实验房间的布置），可以从 JSON 文件部分覆盖。
/// 构造管线前调用 `validate`，配置错误不会延迟到运行期才暴露。

use crate::algorithms::{
    FilterConfig, GridScaler, RSSIModel, Receiver, ReceiverSet, SolverConfig,
};
use crate::channel::DEFAULT_HISTORY_CAPACITY;
use crate::error::{ConfigError, Error, Result};
use crate::ingest::{DEFAULT_TOPIC_PATTERN, MessageDecoder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 单个接收器的配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub id: u8,
    #[serde(default)]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
    /// 1 米处的参考功率 (dBm)
    pub reference_power: f64,
}

impl ReceiverConfig {
    pub fn new(id: u8, x: f64, y: f64, reference_power: f64) -> Self {
        ReceiverConfig {
            id,
            name: None,
            x,
            y,
            reference_power,
        }
    }

    fn to_receiver(&self, path_loss_exponent: f64) -> Receiver {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("receiver_{}", self.id));
        Receiver::new(
            self.id,
            name,
            self.x,
            self.y,
            RSSIModel::new(self.reference_power, path_loss_exponent),
        )
    }
}

/// 显示网格配置，边界缺省时取接收器坐标的最大值
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub size: u32,
    pub bound_x: Option<f64>,
    pub bound_y: Option<f64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            size: 32,
            bound_x: None,
            bound_y: None,
        }
    }
}

/// 管线配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub receivers: Vec<ReceiverConfig>,
    pub path_loss_exponent: f64,
    pub filter: FilterConfig,
    pub history_capacity: usize,
    pub tick_interval_ms: u64,
    pub grid: GridConfig,
    pub solver: SolverConfig,
    /// 输入事件队列容量
    pub ingest_queue: usize,
    /// 广播订阅者的缓冲容量（溢出时丢弃最旧的更新）
    pub broadcast_capacity: usize,
    pub topic_pattern: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            receivers: vec![
                ReceiverConfig::new(1, 0.0, 2.2, -45.0),
                ReceiverConfig::new(2, 3.2, 0.0, -48.0),
                ReceiverConfig::new(3, 3.2, 3.1, -43.0),
            ],
            path_loss_exponent: 1.8,
            filter: FilterConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            tick_interval_ms: 4000,
            grid: GridConfig::default(),
            solver: SolverConfig::default(),
            ingest_queue: 256,
            broadcast_capacity: 16,
            topic_pattern: DEFAULT_TOPIC_PATTERN.to_string(),
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 字符串加载（缺省字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::from)?;
        Self::from_json_str(&content)
    }

    /// 检查全部配置项
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let receivers = self.receiver_set()?;
        self.filter.validate()?;
        self.solver.validate()?;
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidHistoryCapacity);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        if self.ingest_queue == 0 {
            return Err(ConfigError::InvalidQueueCapacity("ingest_queue"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity("broadcast_capacity"));
        }
        self.grid_scaler(&receivers)?;
        self.decoder()?;
        Ok(())
    }

    /// 构造接收器集合（同时检查接收器与路径损耗指数）
    pub fn receiver_set(&self) -> std::result::Result<ReceiverSet, ConfigError> {
        ReceiverSet::new(
            self.receivers
                .iter()
                .map(|r| r.to_receiver(self.path_loss_exponent))
                .collect(),
        )
    }

    /// 构造网格缩放器
    pub fn grid_scaler(&self, receivers: &ReceiverSet) -> std::result::Result<GridScaler, ConfigError> {
        let (max_x, max_y) = receivers.bounds();
        GridScaler::new(
            self.grid.bound_x.unwrap_or(max_x),
            self.grid.bound_y.unwrap_or(max_y),
            self.grid.size,
        )
    }

    pub fn decoder(&self) -> std::result::Result<MessageDecoder, ConfigError> {
        MessageDecoder::new(&self.topic_pattern)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::SolverKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(4));

        let receivers = config.receiver_set().unwrap();
        assert_eq!(receivers.bounds(), (3.2, 3.1));
        assert_eq!(receivers.at(0).name, "receiver_1");
        assert_eq!(receivers.at(2).model.reference_power, -43.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"tick_interval_ms": 500, "solver": {"kind": "two_circle"}, "grid": {"size": 64}}"#,
        )
        .unwrap();
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.solver.kind, SolverKind::TwoCircle);
        assert_eq!(config.solver.max_iterations, 100);
        assert_eq!(config.grid.size, 64);
        assert_eq!(config.receivers.len(), 3);
        assert_eq!(config.filter.measurement_noise, 17.0);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.receivers.pop();
        assert_eq!(
            config.validate(),
            Err(ConfigError::ReceiverCount { expected: 3, found: 2 })
        );

        let mut config = PipelineConfig::default();
        config.receivers[2].id = 1;
        assert_eq!(config.validate(), Err(ConfigError::DuplicateReceiver(1)));

        let mut config = PipelineConfig::default();
        config.receivers[0].id = 7;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReceiverId(7)));

        let mut config = PipelineConfig::default();
        config.path_loss_exponent = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPathLossExponent(0.0)));

        let mut config = PipelineConfig::default();
        config.history_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidHistoryCapacity));

        let mut config = PipelineConfig::default();
        config.tick_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTickInterval));

        let mut config = PipelineConfig::default();
        config.grid.size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGridSize));

        let mut config = PipelineConfig::default();
        config.grid.bound_x = Some(-1.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidGridBounds { .. })));

        let mut config = PipelineConfig::default();
        config.ingest_queue = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueCapacity("ingest_queue")));
    }
}
