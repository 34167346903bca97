/// RSSI 到距离转换模型
///
/// 对数距离路径损耗模型：RSSI(d) = A - 10 * n * log10(d)，距离单位为米

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 根据 RSSI 计算距离（米）
///
/// 反解公式: d = 10^((A - RSSI) / (10 * n))
pub fn distance(rssi: f64, reference_power: f64, path_loss_exponent: f64) -> f64 {
    10_f64.powf((reference_power - rssi) / (10.0 * path_loss_exponent))
}

/// RSSI 转距离模型
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RSSIModel {
    /// 参考功率 A (dBm) - 1 米处的 RSSI
    pub reference_power: f64,
    /// 路径损耗指数 n
    pub path_loss_exponent: f64,
}

impl RSSIModel {
    /// 创建对数路径损耗模型
    ///
    /// # 参数
    /// - `reference_power`: 1 米处的参考功率 (dBm)
    /// - `path_loss_exponent`: 路径损耗指数，室内通常为 1.6 ~ 4
    pub fn new(reference_power: f64, path_loss_exponent: f64) -> Self {
        RSSIModel {
            reference_power,
            path_loss_exponent,
        }
    }

    /// 斜率 B = -10n，对应拟合形式 RSSI(d) = A + B * log10(d)
    pub fn slope(&self) -> f64 {
        -10.0 * self.path_loss_exponent
    }

    /// 根据 RSSI 计算距离（米）
    pub fn rssi_to_distance(&self, rssi: f64) -> f64 {
        distance(rssi, self.reference_power, self.path_loss_exponent)
    }

    /// 根据整数 RSSI 计算距离（米）
    pub fn rssi_to_distance_i16(&self, rssi: i16) -> f64 {
        self.rssi_to_distance(rssi as f64)
    }

    /// 根据距离计算 RSSI
    pub fn distance_to_rssi(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        self.reference_power + self.slope() * distance.log10()
    }

    /// 验证模型参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            return Err(ConfigError::InvalidPathLossExponent(self.path_loss_exponent));
        }
        if !self.reference_power.is_finite() {
            return Err(ConfigError::InvalidReferencePower(self.reference_power));
        }
        Ok(())
    }

    /// 获取模型描述
    pub fn description(&self) -> String {
        format!(
            "RSSI模型 - A={:.2} dBm, n={:.2} (B={:.2})",
            self.reference_power,
            self.path_loss_exponent,
            self.slope()
        )
    }
}

impl Default for RSSIModel {
    fn default() -> Self {
        RSSIModel::new(-69.0, 1.8)
    }
}

impl fmt::Display for RSSIModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_at_reference_power() {
        // 在 1 米处，RSSI 等于参考功率
        let model = RSSIModel::new(-45.0, 1.8);
        assert_relative_eq!(model.rssi_to_distance(-45.0), 1.0);
    }

    #[test]
    fn test_known_values() {
        // 10 dB 衰减、n = 1 时距离为 10 米
        assert_relative_eq!(distance(-55.0, -45.0, 1.0), 10.0, epsilon = 1e-12);
        // n = 2 时 20 dB 衰减为 10 米
        assert_relative_eq!(distance(-65.0, -45.0, 2.0), 10.0, epsilon = 1e-12);
        // 比参考功率更强的信号距离小于 1 米
        assert!(distance(-40.0, -45.0, 1.8) < 1.0);
    }

    #[test]
    fn test_distance_to_rssi_inverse() {
        let model = RSSIModel::default();
        for d in [0.2, 1.0, 2.5, 7.0] {
            let rssi = model.distance_to_rssi(d);
            assert_relative_eq!(model.rssi_to_distance(rssi), d, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_validate() {
        assert!(RSSIModel::new(-45.0, 1.8).validate().is_ok());
        assert_eq!(
            RSSIModel::new(-45.0, 0.0).validate(),
            Err(ConfigError::InvalidPathLossExponent(0.0))
        );
        assert!(RSSIModel::new(-45.0, -2.0).validate().is_err());
        assert!(RSSIModel::new(f64::NAN, 2.0).validate().is_err());
    }
}
