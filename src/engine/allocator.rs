use tracing::debug;

use super::client::Client;
use super::station::BaseStation;

/// Priority pass weights: QoS classes run 1..=5, lower is higher priority.
const QOS_CLASS_RANGE: f64 = 5.0;

/// Re-slice each slice's remaining bandwidth among its connected clients.
/// Runs every half tick; the written `allocated_bandwidth` figures are read
/// by the next Lock phase, with the share formula as fallback.
///
/// When demand fits the pool everyone gets their full remaining usage.
/// Otherwise a guarantee pass hands out the per-user minimum and a priority
/// pass distributes what is left by waiting time and QoS weight.
pub fn allocate(clients: &mut [Client], stations: &[BaseStation], now: f64) {
    for bs in stations {
        for (slice_idx, slice) in bs.slices.iter().enumerate() {
            let mut members: Vec<usize> = clients
                .iter()
                .enumerate()
                .filter(|(_, c)| {
                    c.connected
                        && c.base_station == Some(bs.pk)
                        && c.subscribed_slice == slice_idx
                })
                .map(|(i, _)| i)
                .collect();
            if members.is_empty() {
                continue;
            }

            // Longest-waiting first; equal waits keep pk order (the sort is
            // stable and members are collected in pk order).
            members.sort_by(|&a, &b| {
                let wait_a = now - clients[a].request_start_time;
                let wait_b = now - clients[b].request_start_time;
                wait_b.total_cmp(&wait_a)
            });

            let pool = slice.capacity.level() - slice.reserved_capacity();
            let demand: f64 = members.iter().map(|&i| clients[i].usage_remaining).sum();

            if demand <= pool {
                for &i in &members {
                    clients[i].allocated_bandwidth = Some(clients[i].usage_remaining);
                }
                continue;
            }

            debug!(
                station = bs.pk.0,
                slice = %slice.name,
                demand,
                pool,
                users = members.len(),
                "demand exceeds pool, prioritizing"
            );

            // Guarantee pass: per-user minimum first.
            let mut remaining = pool;
            for &i in &members {
                let floor = slice.bandwidth_guaranteed.min(clients[i].usage_remaining);
                clients[i].allocated_bandwidth = Some(floor);
                remaining -= floor;
            }

            // Priority pass: distribute the rest by waiting time and QoS.
            if remaining > 0.0 {
                let qos_weight = (QOS_CLASS_RANGE - slice.qos_class as f64) / QOS_CLASS_RANGE;
                for &i in &members {
                    let waiting = now - clients[i].request_start_time;
                    let time_factor = (waiting / slice.delay_tolerance).clamp(0.0, 1.0);
                    let priority = time_factor * qos_weight;

                    let current = clients[i].allocated_bandwidth.unwrap_or(0.0);
                    let additional = (remaining * priority)
                        .min(clients[i].usage_remaining - current)
                        .max(0.0);
                    clients[i].allocated_bandwidth = Some(current + additional);
                    remaining -= additional;

                    if remaining <= 0.0 {
                        break;
                    }
                }
            }
        }
    }
}
