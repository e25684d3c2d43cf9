//! Prometheus metrics CLI arguments.

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};

/// Configuration for the Prometheus metrics exporter.
#[derive(Parser, Clone, Debug, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Controls whether Prometheus metrics are served.
    #[arg(
        long = "metrics.enabled",
        global = true,
        default_value_t = false,
        env = "TXSWEEP_METRICS_ENABLED"
    )]
    pub enabled: bool,

    /// The address the metrics server listens on.
    #[arg(
        long = "metrics.addr",
        global = true,
        default_value = "0.0.0.0",
        env = "TXSWEEP_METRICS_ADDR"
    )]
    pub addr: IpAddr,

    /// The port the metrics server listens on. `0` picks a free port.
    #[arg(
        long = "metrics.port",
        global = true,
        default_value_t = 9090,
        env = "TXSWEEP_METRICS_PORT"
    )]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Installs the Prometheus exporter if metrics are enabled.
    pub fn init_metrics(&self) -> Result<(), crate::PrometheusError> {
        if self.enabled {
            crate::init_prometheus_server(self.addr, self.port)?;
        }
        Ok(())
    }
}
