/// 本机蓝牙扫描（`ble` 特性）
///
/// 本机作为三个接收器之一：周期性读取名称匹配的外设的 RSSI，
/// 作为该接收器的样本送入管线

use crate::channel::RawSample;
use crate::error::IngestError;
use crate::positioning::{EventSender, stopped};
use btleplug::api::{Central, Manager, Peripheral};
use btleplug::platform::Manager as PlatformManager;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 扫描错误
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("蓝牙操作失败: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("未找到蓝牙适配器")]
    NoAdapter,
}

/// 扫描参数
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// 信标名称过滤
    pub name_pattern: Regex,
    /// 本机代表的接收器编号
    pub receiver_id: u8,
    pub poll_interval: Duration,
}

impl ScanConfig {
    pub fn new(name_pattern: Regex, receiver_id: u8) -> Self {
        ScanConfig {
            name_pattern,
            receiver_id,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// 扫描直到停止信号或管线关闭，返回送出的样本数
pub async fn run_scanner(
    config: ScanConfig,
    events: EventSender,
    mut stop: watch::Receiver<bool>,
) -> Result<usize, ScannerError> {
    let manager = PlatformManager::new().await?;
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or(ScannerError::NoAdapter)?;

    adapter.start_scan(Default::default()).await?;
    info!(
        receiver = config.receiver_id,
        pattern = %config.name_pattern,
        "蓝牙扫描已启动"
    );

    let mut sent = 0;
    let mut ticker = tokio::time::interval(config.poll_interval);
    'scan: loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        for peripheral in adapter.peripherals().await? {
            // 单次查询 properties
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            let (Some(name), Some(rssi)) = (properties.local_name, properties.rssi) else {
                continue;
            };
            if !config.name_pattern.is_match(&name) {
                continue;
            }

            debug!(device = %name, address = %peripheral.address(), rssi, "扫描到信标");
            match events.send(RawSample::new(config.receiver_id, rssi)).await {
                Ok(()) => sent += 1,
                Err(IngestError::Stopped) => break 'scan,
                Err(e) => warn!(error = %e, "扫描样本未送出"),
            }
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        warn!(error = %e, "停止蓝牙扫描失败");
    }
    info!(samples = sent, "蓝牙扫描已结束");
    Ok(sent)
}
