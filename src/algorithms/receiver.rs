/// 接收器定义
///
/// 三个固定位置的接收器，构造后坐标与校准参数不可变

use crate::algorithms::RSSIModel;
use crate::error::ConfigError;
use tracing::warn;

/// 系统固定使用三个接收器
pub const RECEIVER_COUNT: usize = 3;

/// 单个接收器
#[derive(Clone, Debug, PartialEq)]
pub struct Receiver {
    /// 接收器编号（1..=3）
    pub id: u8,
    /// 接收器友好名称
    pub name: String,
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 该接收器的 RSSI 校准模型
    pub model: RSSIModel,
}

impl Receiver {
    /// 创建新的接收器
    pub fn new(id: u8, name: impl Into<String>, x: f64, y: f64, model: RSSIModel) -> Self {
        Receiver {
            id,
            name: name.into(),
            x,
            y,
            model,
        }
    }

    /// 获取接收器的 2D 坐标
    pub fn coordinates(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 计算与另一接收器的欧几里得距离
    pub fn distance_to(&self, other: &Receiver) -> f64 {
        self.distance_to_point(other.x, other.y)
    }

    /// 计算与任意点的欧几里得距离
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 使用本接收器的校准模型把 RSSI 转换为距离
    pub fn rssi_to_distance(&self, rssi: f64) -> f64 {
        self.model.rssi_to_distance(rssi)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=RECEIVER_COUNT as u8).contains(&self.id) {
            return Err(ConfigError::InvalidReceiverId(self.id));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ConfigError::InvalidCoordinate {
                id: self.id,
                x: self.x,
                y: self.y,
            });
        }
        self.model.validate()
    }
}

/// 接收器集合 - 固定三个，按编号排序
#[derive(Clone, Debug)]
pub struct ReceiverSet {
    receivers: [Receiver; RECEIVER_COUNT],
}

impl ReceiverSet {
    /// 从接收器向量创建集合
    ///
    /// 数量不为 3、编号重复或越界、坐标或模型无效时返回配置错误
    pub fn new(receivers: Vec<Receiver>) -> Result<Self, ConfigError> {
        if receivers.len() != RECEIVER_COUNT {
            return Err(ConfigError::ReceiverCount {
                expected: RECEIVER_COUNT,
                found: receivers.len(),
            });
        }
        for receiver in &receivers {
            receiver.validate()?;
        }

        let mut receivers = receivers;
        receivers.sort_by_key(|r| r.id);
        for pair in receivers.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(ConfigError::DuplicateReceiver(pair[0].id));
            }
        }

        let receivers: [Receiver; RECEIVER_COUNT] = receivers
            .try_into()
            .map_err(|v: Vec<Receiver>| ConfigError::ReceiverCount {
                expected: RECEIVER_COUNT,
                found: v.len(),
            })?;
        let set = ReceiverSet { receivers };

        if set.is_degenerate() {
            warn!("接收器几何近似共线，三边定位可能持续失败");
        }
        Ok(set)
    }

    /// 按编号获取接收器
    pub fn get(&self, id: u8) -> Option<&Receiver> {
        self.index_of(id).map(|idx| &self.receivers[idx])
    }

    /// 编号对应的内部下标
    pub fn index_of(&self, id: u8) -> Option<usize> {
        self.receivers.iter().position(|r| r.id == id)
    }

    /// 按下标获取接收器
    pub fn at(&self, index: usize) -> &Receiver {
        &self.receivers[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Receiver> {
        self.receivers.iter()
    }

    pub fn len(&self) -> usize {
        RECEIVER_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// 每个坐标轴上的最大接收器坐标，用作网格缩放的默认边界
    pub fn bounds(&self) -> (f64, f64) {
        let max_x = self.receivers.iter().map(|r| r.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = self.receivers.iter().map(|r| r.y).fold(f64::NEG_INFINITY, f64::max);
        (max_x, max_y)
    }

    /// 三个接收器构成的三角形是否退化（面积相对最长边过小）
    pub fn is_degenerate(&self) -> bool {
        let [a, b, c] = &self.receivers;
        super::trilateration::is_degenerate((a.x, a.y), (b.x, b.y), (c.x, c.y))
    }
}
