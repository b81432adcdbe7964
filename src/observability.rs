use std::net::SocketAddr;

// ── Grid ────────────────────────────────────────────────────────

/// Counter: grids built.
pub const GRID_BUILDS_TOTAL: &str = "rentgrid_grid_builds_total";

/// Histogram: grid build time in seconds.
pub const GRID_BUILD_DURATION_SECONDS: &str = "rentgrid_grid_build_duration_seconds";

/// Counter: reservations pushed to overflow by a double booking.
pub const OVERLAP_CONFLICTS_TOTAL: &str = "rentgrid_overlap_conflicts_total";

// ── Pipeline ────────────────────────────────────────────────────

/// Counter: transition requests. Labels: outcome, to.
pub const TRANSITIONS_TOTAL: &str = "rentgrid_transitions_total";

/// Histogram: store round-trip for a transition, in seconds.
pub const TRANSITION_DURATION_SECONDS: &str = "rentgrid_transition_duration_seconds";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: resnapshots. Labels: outcome (installed, stale, failed).
pub const RESNAPSHOTS_TOTAL: &str = "rentgrid_resnapshots_total";

/// Counter: failed list/subscribe calls.
pub const FETCH_FAILURES_TOTAL: &str = "rentgrid_fetch_failures_total";

/// Gauge: 1 while the view is degraded.
pub const DEGRADED: &str = "rentgrid_degraded";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

