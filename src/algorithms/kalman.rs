/// 一维卡尔曼滤波器 - 平滑单个接收器的 RSSI 时间序列
///
/// 状态转移与观测矩阵均为 1，无控制输入

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// P + R 的下限，避免两者都接近 0 时除零
const MIN_INNOVATION_VARIANCE: f64 = 1e-12;

/// 滤波器参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 测量噪声方差 R
    pub measurement_noise: f64,
    /// 过程噪声 Q，每次预测时加到 P 上（可为 0）
    pub process_noise: f64,
    /// 初始协方差 P0
    pub initial_covariance: f64,
    /// 初始估计值 x0
    pub initial_estimate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            measurement_noise: 17.0,
            process_noise: 1.0,
            initial_covariance: 1000.0,
            initial_estimate: 0.0,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("measurement_noise", self.measurement_noise),
            ("process_noise", self.process_noise),
            ("initial_covariance", self.initial_covariance),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidFilterParameter { name, value });
            }
        }
        if !self.initial_estimate.is_finite() {
            return Err(ConfigError::InvalidFilterParameter {
                name: "initial_estimate",
                value: self.initial_estimate,
            });
        }
        Ok(())
    }
}

/// 单通道卡尔曼滤波器
#[derive(Clone, Debug)]
pub struct ChannelFilter {
    /// 当前估计值
    x: f64,
    /// 估计协方差
    p: f64,
    /// 过程噪声
    q: f64,
    /// 测量噪声
    r: f64,
}

impl ChannelFilter {
    pub fn new(config: &FilterConfig) -> Self {
        ChannelFilter {
            x: config.initial_estimate,
            p: config.initial_covariance,
            q: config.process_noise,
            r: config.measurement_noise,
        }
    }

    /// 预测：P += Q
    pub fn predict(&mut self) {
        self.p += self.q;
    }

    /// 更新：计算卡尔曼增益并修正估计，返回新的估计值
    pub fn update(&mut self, measurement: f64) -> f64 {
        let k = self.p / (self.p + self.r).max(MIN_INNOVATION_VARIANCE);
        self.x += k * (measurement - self.x);
        self.p *= 1.0 - k;
        self.x
    }

    /// 一次完整的预测 + 更新
    pub fn step(&mut self, measurement: f64) -> f64 {
        self.predict();
        self.update(measurement)
    }

    pub fn estimate(&self) -> f64 {
        self.x
    }

    pub fn covariance(&self) -> f64 {
        self.p
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}
