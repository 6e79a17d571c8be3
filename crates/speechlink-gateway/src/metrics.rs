//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
}

pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record a control message by action name.
pub fn record_action(action: &'static str) {
    metrics::counter!("control_actions_total", "action" => action).increment(1);
}

/// Record which provider won selection for a direction.
pub fn record_provider_selected(direction: &'static str, provider: &'static str) {
    metrics::counter!(
        "provider_selections_total",
        "direction" => direction,
        "provider" => provider
    )
    .increment(1);
}

pub fn record_synthesis_requested(streaming: bool) {
    let mode = if streaming { "streaming" } else { "blocking" };
    metrics::counter!("synthesis_requests_total", "mode" => mode).increment(1);
}

/// Record an error of a given kind.
pub fn record_error(kind: &'static str) {
    metrics::counter!("errors_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder can be installed per process.
        let handle = install_prometheus_recorder().unwrap();
        record_action("start");
        let output = handle.render();
        assert!(output.contains("control_actions_total"));
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_ws_connect();
        record_ws_disconnect();
        record_provider_selected("asr", "loopback");
        record_synthesis_requested(true);
        record_error("provider");
    }
}
