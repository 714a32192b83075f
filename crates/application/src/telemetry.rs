//! 设备实时信息采集端口

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("telemetry sampling failed: {0}")]
pub struct TelemetryError(pub String);

/// 单个网卡在采样间隔内的收发字节数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceThroughput {
    pub adapter_code: String,
    pub adapter_name: String,
    pub upload: u64,
    pub download: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// `YYYY-MM-DD HH:MM:SS`（本地时间）
    pub time: String,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub network: BTreeMap<String, InterfaceThroughput>,
}

#[async_trait]
pub trait DeviceSampler: Send + Sync {
    /// 一次完整采样，内部可能等待一个采样间隔
    async fn sample(&self) -> Result<DeviceSnapshot, TelemetryError>;
}
