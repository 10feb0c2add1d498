use std::time::Instant;

use koc_common::SystemStats;
use sysinfo::{Networks, System};

const MB: f64 = 1024.0 * 1024.0;

pub trait StatsSource: Send {
    fn sample(&mut self) -> SystemStats;
}

/// Samples the host with `sysinfo`. Bandwidth is the combined send and receive
/// rate since the previous sample.
pub struct HostStats {
    system: System,
    networks: Networks,
    last_sample: Option<(Instant, u64)>,
}

impl HostStats {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            last_sample: None,
        }
    }
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for HostStats {
    fn sample(&mut self) -> SystemStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let ram_used_mb = self.system.used_memory() as f64 / MB;
        let ram_total_mb = self.system.total_memory() as f64 / MB;
        let (net_bytes_sent, net_bytes_recv) = self
            .networks
            .list()
            .values()
            .fold((0u64, 0u64), |(sent, recv), data| {
                (
                    sent.saturating_add(data.total_transmitted()),
                    recv.saturating_add(data.total_received()),
                )
            });

        let now = Instant::now();
        let total = net_bytes_sent.saturating_add(net_bytes_recv);
        let net_bandwidth_mbps = match self.last_sample.replace((now, total)) {
            Some((then, previous)) => {
                let elapsed = now.duration_since(then).as_secs_f64();
                if elapsed > 0.0 {
                    total.saturating_sub(previous) as f64 * 8.0 / elapsed / 1_000_000.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        SystemStats {
            cpu_percent: self.system.global_cpu_usage(),
            ram_percent: if ram_total_mb > 0.0 {
                (ram_used_mb / ram_total_mb * 100.0) as f32
            } else {
                0.0
            },
            ram_used_mb,
            ram_total_mb,
            net_bytes_sent,
            net_bytes_recv,
            net_bandwidth_mbps,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_sample_is_consistent() {
        let mut stats = HostStats::new();
        let first = stats.sample();
        let second = stats.sample();
        assert_eq!(first.net_bandwidth_mbps, 0.0);
        assert!(second.net_bandwidth_mbps >= 0.0);
        assert!(second.ram_used_mb <= second.ram_total_mb);
        assert!((0.0..=100.0).contains(&second.ram_percent));
    }
}
