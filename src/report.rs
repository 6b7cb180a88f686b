use std::fmt::Write;

use anyhow::Result;

use crate::config::Config;
use crate::engine::Simulation;
use crate::stats::AggregateSeries;

/// Render the end-of-run report: per-client blocks, the aggregate series
/// trimmed to the warmup/cooldown window, and the latency analysis.
pub fn render(sim: &Simulation, config: &Config) -> Result<String> {
    let mut out = String::new();

    writeln!(
        out,
        "# ranslice report — generated {}, seed {}",
        chrono::Utc::now().to_rfc3339(),
        sim.seed()
    )?;
    writeln!(out)?;

    render_stations(&mut out, sim)?;
    render_clients(&mut out, sim, config)?;

    let windowed = reporting_window(sim.stats.series(), config);
    writeln!(out, "AGGREGATE SERIES (per tick)")?;
    writeln!(out, "{}", "-".repeat(50))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&windowed)?)?;

    if config.settings.latency_tracking {
        render_latency_analysis(&mut out, &windowed)?;
    }

    Ok(out)
}

fn render_stations(out: &mut String, sim: &Simulation) -> Result<()> {
    for bs in &sim.stations {
        let (cx, cy) = bs.coverage.center();
        writeln!(
            out,
            "Station_{} [{:.1}, {:.1}] r={:.1} bandwidth={:.1}",
            bs.pk.0,
            cx,
            cy,
            bs.coverage.radius(),
            bs.capacity_bandwidth
        )?;
        for slice in &bs.slices {
            writeln!(
                out,
                "    {:<12} init={:<8.2} level={:<8.2} users={:<4} sla_violations={}",
                slice.name,
                slice.init_capacity,
                slice.capacity.level(),
                slice.connected_users,
                slice.sla_violations()
            )?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn render_clients(out: &mut String, sim: &Simulation, config: &Config) -> Result<()> {
    for client in &sim.clients {
        let slice_name = config
            .slices
            .get_index(client.subscribed_slice)
            .map(|(name, _)| name.as_str())
            .unwrap_or("?");
        let attachment = match client.base_station {
            Some(sid) => format!("station {}", sid.0),
            None => "uncovered".to_string(),
        };

        writeln!(
            out,
            "Client_{} [{:.2}, {:.2}] slice={} ({}) mobility={}",
            client.pk.0,
            client.x,
            client.y,
            slice_name,
            attachment,
            client.mobility.name()
        )?;
        writeln!(
            out,
            "    Total connected time:   {:>8.2}",
            client.total_connected_time
        )?;
        writeln!(
            out,
            "    Total unconnected time: {:>8.2}",
            client.total_unconnected_time
        )?;
        writeln!(
            out,
            "    Total request count:    {:>8}",
            client.total_request_count
        )?;
        writeln!(
            out,
            "    Total consume time:     {:>8}",
            client.total_consume_time
        )?;
        writeln!(out, "    Total usage:            {:>8.2}", client.total_usage)?;

        if !client.latencies.is_empty() {
            let min = if client.min_latency.is_finite() {
                client.min_latency
            } else {
                0.0
            };
            writeln!(out, "    Average latency:        {:>8.3}", client.avg_latency)?;
            writeln!(out, "    Minimum latency:        {:>8.3}", min)?;
            writeln!(out, "    Maximum latency:        {:>8.3}", client.max_latency)?;
            writeln!(out, "    Handover count:         {:>8}", client.handover_count)?;
            writeln!(
                out,
                "    Avg handover latency:   {:>8.3}",
                client.avg_handover_latency()
            )?;
            writeln!(
                out,
                "    Connected ratio:        {:>8.3}",
                client.connected_time_ratio()
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn render_latency_analysis(out: &mut String, series: &AggregateSeries) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "LATENCY ANALYSIS")?;
    writeln!(out, "{}", "-".repeat(50))?;
    writeln!(
        out,
        "Overall average latency: {:.3}",
        series.overall_avg_latency()
    )?;
    writeln!(out)?;
    writeln!(out, "Average latency by slice:")?;
    for (name, avg) in series.avg_latency_by_slice() {
        writeln!(out, "  {name}: {avg:.3}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "SLA violation rate: {:.3}",
        series.overall_sla_violation_rate()
    )?;
    writeln!(out, "{}", "-".repeat(50))?;
    Ok(())
}

/// Trim the series to `[T * warmup, T * (1 - cooldown)]` tick indices.
fn reporting_window(series: &AggregateSeries, config: &Config) -> AggregateSeries {
    let time = config.settings.simulation_time as f64;
    let params = &config.settings.statistics_params;
    let start = (time * params.warmup_ratio) as usize;
    let end = (time * (1.0 - params.cooldown_ratio)) as usize + 1;
    series.window(start, end)
}
