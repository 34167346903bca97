/// 输入消息解码
///
/// 接收器通过 MQTT 风格的消息上报：主题 `receivers/<编号>`，
/// 负载为 JSON `{"time": "19/10/2026 12:00:00", "address": "...", "rssi": -60}`。
/// 解码后得到类型化的 `RawSample`，无效消息返回 `IngestError`。

use crate::channel::RawSample;
use crate::error::{ConfigError, IngestError};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;

/// 默认主题格式，捕获组 1 为接收器编号
pub const DEFAULT_TOPIC_PATTERN: &str = r"^receivers/(\d{1,3})$";
/// 接收器上报的时间格式
pub const RECEIVER_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// RSSI 的合理范围 (dBm)
pub const MIN_RSSI: i64 = -127;
pub const MAX_RSSI: i64 = 20;

/// 送入管线的输入事件
#[derive(Clone, Debug, PartialEq)]
pub enum IngestEvent {
    /// 已解码的样本
    Sample(RawSample),
    /// 原始消息，由管线的接收任务解码
    Message { topic: String, payload: Vec<u8> },
}

impl From<RawSample> for IngestEvent {
    fn from(sample: RawSample) -> Self {
        IngestEvent::Sample(sample)
    }
}

/// 接收器消息负载
#[derive(Debug, Deserialize)]
struct ReceiverPayload {
    time: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    address: Option<String>,
    rssi: i64,
}

/// 标准输入的一行：主题 + 负载，或直接给出样本字段
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundLine {
    Topic {
        topic: String,
        payload: serde_json::Value,
    },
    Sample {
        receiver_id: i64,
        rssi: i64,
        #[serde(default)]
        timestamp: Option<String>,
    },
}

/// 解析时间戳
///
/// 支持接收器格式（按 UTC 解释）与 RFC 3339
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, IngestError> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, RECEIVER_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| IngestError::InvalidTimestamp(value.to_string()))
}

/// 检查 RSSI 范围
pub fn validate_rssi(rssi: i64) -> Result<i16, IngestError> {
    if !(MIN_RSSI..=MAX_RSSI).contains(&rssi) {
        return Err(IngestError::RssiOutOfRange(rssi));
    }
    Ok(rssi as i16)
}

fn receiver_id(raw: i64) -> Result<u8, IngestError> {
    u8::try_from(raw).map_err(|_| IngestError::MalformedPayload(format!("接收器编号无效: {}", raw)))
}

/// 消息解码器
#[derive(Clone, Debug)]
pub struct MessageDecoder {
    topic: Regex,
}

impl MessageDecoder {
    /// 使用自定义主题格式创建解码器，格式必须包含一个捕获接收器编号的分组
    pub fn new(topic_pattern: &str) -> Result<Self, ConfigError> {
        let topic = Regex::new(topic_pattern)
            .map_err(|e| ConfigError::InvalidTopicPattern(e.to_string()))?;
        if topic.captures_len() < 2 {
            return Err(ConfigError::InvalidTopicPattern(format!(
                "{} 缺少接收器编号捕获组",
                topic_pattern
            )));
        }
        Ok(MessageDecoder { topic })
    }

    /// 从主题中提取接收器编号
    pub fn receiver_from_topic(&self, topic: &str) -> Result<u8, IngestError> {
        self.topic
            .captures(topic)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))
    }

    /// 解码一条主题消息
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<RawSample, IngestError> {
        let receiver_id = self.receiver_from_topic(topic)?;
        let payload: ReceiverPayload = serde_json::from_slice(payload)
            .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
        Self::build(receiver_id, payload)
    }

    /// 解码标准输入中的一行 JSON
    pub fn decode_line(&self, line: &str) -> Result<RawSample, IngestError> {
        let inbound: InboundLine = serde_json::from_str(line)
            .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
        match inbound {
            InboundLine::Topic { topic, payload } => {
                let receiver_id = self.receiver_from_topic(&topic)?;
                let payload: ReceiverPayload = serde_json::from_value(payload)
                    .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
                Self::build(receiver_id, payload)
            }
            InboundLine::Sample {
                receiver_id: id,
                rssi,
                timestamp,
            } => Self::build(
                receiver_id(id)?,
                ReceiverPayload {
                    time: timestamp,
                    address: None,
                    rssi,
                },
            ),
        }
    }

    /// 解码输入事件
    pub fn decode_event(&self, event: IngestEvent) -> Result<RawSample, IngestError> {
        match event {
            IngestEvent::Sample(sample) => {
                validate_rssi(sample.rssi as i64)?;
                Ok(sample)
            }
            IngestEvent::Message { topic, payload } => self.decode(&topic, &payload),
        }
    }

    fn build(receiver_id: u8, payload: ReceiverPayload) -> Result<RawSample, IngestError> {
        let rssi = validate_rssi(payload.rssi)?;
        let timestamp = match payload.time {
            Some(time) => parse_timestamp(&time)?,
            None => Utc::now(),
        };
        Ok(RawSample::with_timestamp(receiver_id, rssi, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decoder() -> MessageDecoder {
        MessageDecoder::new(DEFAULT_TOPIC_PATTERN).unwrap()
    }

    #[test]
    fn test_decode_receiver_message() {
        let payload = br#"{"time": "01/08/2021 12:00:00", "address": "address_1", "rssi": -42}"#;
        let sample = decoder().decode("receivers/2", payload).unwrap();
        assert_eq!(sample.receiver_id, 2);
        assert_eq!(sample.rssi, -42);
        assert_eq!(sample.timestamp, Utc.with_ymd_and_hms(2021, 8, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_unknown_topic() {
        let payload = br#"{"time": "01/08/2021 12:00:00", "rssi": -42}"#;
        assert_eq!(
            decoder().decode("beacons/1", payload),
            Err(IngestError::UnknownTopic("beacons/1".to_string()))
        );
    }

    #[test]
    fn test_malformed_payload() {
        let result = decoder().decode("receivers/1", b"{not json");
        assert!(matches!(result, Err(IngestError::MalformedPayload(_))));

        let result = decoder().decode("receivers/1", br#"{"time": "yesterday", "rssi": -42}"#);
        assert_eq!(result, Err(IngestError::InvalidTimestamp("yesterday".to_string())));

        let result = decoder().decode("receivers/1", br#"{"rssi": -300}"#);
        assert_eq!(result, Err(IngestError::RssiOutOfRange(-300)));
    }

    #[test]
    fn test_decode_lines() {
        let d = decoder();
        let sample = d
            .decode_line(r#"{"receiver_id": 3, "rssi": -70, "timestamp": "2026-10-19T08:00:00Z"}"#)
            .unwrap();
        assert_eq!((sample.receiver_id, sample.rssi), (3, -70));

        let sample = d
            .decode_line(r#"{"topic": "receivers/1", "payload": {"time": "19/10/2026 08:00:00", "rssi": -55}}"#)
            .unwrap();
        assert_eq!((sample.receiver_id, sample.rssi), (1, -55));

        assert!(d.decode_line(r#"{"receiver_id": 999, "rssi": -70}"#).is_err());
    }

    #[test]
    fn test_invalid_topic_pattern() {
        assert!(MessageDecoder::new("receivers/[").is_err());
        assert!(MessageDecoder::new("^receivers/\\d+$").is_err());
    }
}
