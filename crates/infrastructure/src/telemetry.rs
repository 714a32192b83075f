use std::{collections::BTreeMap, time::Duration};

use application::{DeviceSampler, DeviceSnapshot, InterfaceThroughput, TelemetryError};
use async_trait::async_trait;
use chrono::Local;
use sysinfo::{Networks, System};

/// 基于 sysinfo 的本机采样。
///
/// CPU 占用与网卡吞吐都需要两次读数，两次之间等待 `sample_gap`。
#[derive(Debug, Clone)]
pub struct SysinfoSampler {
    sample_gap: Duration,
}

impl SysinfoSampler {
    pub fn new(sample_gap: Duration) -> Self {
        Self {
            sample_gap: sample_gap.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

fn network_totals(networks: &Networks) -> BTreeMap<String, (String, u64, u64)> {
    networks
        .list()
        .iter()
        .map(|(name, data)| {
            (
                name.clone(),
                (
                    data.mac_address().to_string(),
                    data.total_transmitted(),
                    data.total_received(),
                ),
            )
        })
        .collect()
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

#[async_trait]
impl DeviceSampler for SysinfoSampler {
    async fn sample(&self) -> Result<DeviceSnapshot, TelemetryError> {
        let mut system = System::new();
        system.refresh_cpu_usage();
        let before = network_totals(&Networks::new_with_refreshed_list());

        tokio::time::sleep(self.sample_gap).await;

        system.refresh_cpu_usage();
        system.refresh_memory();
        let after = network_totals(&Networks::new_with_refreshed_list());

        let cpu_usage = f64::from(system.global_cpu_usage());
        if !cpu_usage.is_finite() {
            return Err(TelemetryError(format!("cpu usage not available: {cpu_usage}")));
        }

        let network = after
            .into_iter()
            .filter_map(|(name, (mac, sent, received))| {
                let (_, sent_before, received_before) = before.get(&name)?;
                Some((
                    name.clone(),
                    InterfaceThroughput {
                        adapter_code: mac,
                        adapter_name: name,
                        upload: sent.saturating_sub(*sent_before),
                        download: received.saturating_sub(*received_before),
                    },
                ))
            })
            .collect();

        Ok(DeviceSnapshot {
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            cpu_usage: (cpu_usage * 100.0).round() / 100.0,
            mem_usage: percentage(system.used_memory(), system.total_memory()),
            network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_handles_zero_total() {
        assert_eq!(percentage(10, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
    }

    #[tokio::test]
    async fn sample_produces_plausible_numbers() {
        let sampler = SysinfoSampler::new(Duration::from_millis(10));
        let snapshot = sampler.sample().await.unwrap();
        assert_eq!(snapshot.time.len(), "2024-01-01 00:00:00".len());
        assert!((0.0..=100.0).contains(&snapshot.mem_usage));
        assert!(snapshot.cpu_usage >= 0.0);
    }
}
