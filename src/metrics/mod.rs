// metrics/mod.rs
use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn setup_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

pub fn connection_opened(role: &'static str) {
    counter!("hub_connections_total", "role" => role).increment(1);
}

pub fn auth_failure() {
    counter!("hub_auth_failures_total").increment(1);
}

pub fn broadcast_sent() {
    counter!("hub_broadcasts_total").increment(1);
}

pub fn message_dropped() {
    counter!("hub_messages_dropped_total").increment(1);
}
