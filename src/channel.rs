/// 接收器通道 - 每个接收器一个滤波器和一个历史缓冲
///
/// 通道状态只由该接收器的样本更新，管线只读取最新滤波值

use crate::algorithms::{ChannelFilter, FilterConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 默认历史容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// 原始 RSSI 样本
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// 接收器编号
    pub receiver_id: u8,
    /// 信号强度 (dBm)
    pub rssi: i16,
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    pub fn new(receiver_id: u8, rssi: i16) -> Self {
        Self::with_timestamp(receiver_id, rssi, Utc::now())
    }

    pub fn with_timestamp(receiver_id: u8, rssi: i16, timestamp: DateTime<Utc>) -> Self {
        RawSample {
            receiver_id,
            rssi,
            timestamp,
        }
    }
}

/// 历史缓冲中的一条记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    pub raw_rssi: i16,
    pub filtered_rssi: f64,
}

/// 有界历史缓冲（FIFO，满后淘汰最旧记录）
#[derive(Clone, Debug)]
pub struct ChannelHistory {
    records: VecDeque<SampleRecord>,
    capacity: usize,
}

impl ChannelHistory {
    /// 容量为 0 时按 1 处理
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ChannelHistory {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加记录，返回被淘汰的最旧记录
    pub fn push(&mut self, record: SampleRecord) -> Option<SampleRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn latest(&self) -> Option<&SampleRecord> {
        self.records.back()
    }

    /// 从旧到新迭代
    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<SampleRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 单个接收器的通道：滤波器 + 历史缓冲
#[derive(Clone, Debug)]
pub struct Channel {
    receiver_id: u8,
    filter: ChannelFilter,
    history: ChannelHistory,
    samples: u64,
    filtered: Option<f64>,
}

impl Channel {
    pub fn new(receiver_id: u8, filter: &FilterConfig, capacity: usize) -> Self {
        Channel {
            receiver_id,
            filter: ChannelFilter::new(filter),
            history: ChannelHistory::new(capacity),
            samples: 0,
            filtered: None,
        }
    }

    /// 处理一个样本：预测 + 更新，并记录到历史
    pub fn apply(&mut self, sample: &RawSample) -> SampleRecord {
        let filtered_rssi = self.filter.step(sample.rssi as f64);
        let record = SampleRecord {
            timestamp: sample.timestamp,
            raw_rssi: sample.rssi,
            filtered_rssi,
        };
        self.history.push(record.clone());
        self.samples += 1;
        self.filtered = Some(filtered_rssi);
        record
    }

    /// 最新滤波值；尚未收到样本时为 None
    pub fn latest_filtered(&self) -> Option<f64> {
        self.filtered
    }

    pub fn receiver_id(&self) -> u8 {
        self.receiver_id
    }

    pub fn history(&self) -> &ChannelHistory {
        &self.history
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(raw: i16) -> SampleRecord {
        SampleRecord {
            timestamp: Utc::now(),
            raw_rssi: raw,
            filtered_rssi: raw as f64,
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = ChannelHistory::new(3);
        assert!(history.push(record(-1)).is_none());
        assert!(history.push(record(-2)).is_none());
        assert!(history.push(record(-3)).is_none());
        let evicted = history.push(record(-4)).unwrap();
        assert_eq!(evicted.raw_rssi, -1);
        let raws: Vec<i16> = history.iter().map(|r| r.raw_rssi).collect();
        assert_eq!(raws, vec![-2, -3, -4]);
        assert_eq!(history.latest().unwrap().raw_rssi, -4);
    }

    #[test]
    fn test_channel_apply() {
        let mut channel = Channel::new(2, &FilterConfig::default(), DEFAULT_HISTORY_CAPACITY);
        assert!(channel.latest_filtered().is_none());

        let record = channel.apply(&RawSample::new(2, -60));
        assert_eq!(record.raw_rssi, -60);
        assert_eq!(channel.latest_filtered(), Some(record.filtered_rssi));
        assert_eq!(channel.samples(), 1);
        assert_eq!(channel.history().len(), 1);
        assert_eq!(channel.filter().estimate(), record.filtered_rssi);
    }
}
