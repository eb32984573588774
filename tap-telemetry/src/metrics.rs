use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs a global Prometheus recorder and serves it on `0.0.0.0:{port}/metrics`.
///
/// When `project_ref` is set it is attached to every metric as the `project` label. Must be
/// called from within a tokio runtime since the exporter spawns its HTTP listener there.
pub fn init_metrics(port: u16, project_ref: Option<String>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));

    if let Some(project_ref) = project_ref {
        builder = builder.add_global_label("project", project_ref);
    }

    builder.install()?;

    Ok(())
}
