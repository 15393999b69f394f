//! Fire-and-forget UDP sinks for diagnostics, alerts and metrics.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use solar_common::{config::RemoteConfig, FailureKind};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Free-text event for the remote log collector.
    async fn diagnostic(&self, message: &str);

    async fn alert(&self, kind: FailureKind, message: &str);
}

#[derive(Debug)]
struct Target {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl Target {
    async fn bind(addr: Option<&str>, purpose: &str) -> Option<Self> {
        let addr = addr?;
        let resolved = match tokio::net::lookup_host(addr).await {
            Ok(mut addrs) => addrs.next(),
            Err(err) => {
                warn!("cannot resolve {purpose} address {addr}: {err}");
                None
            }
        }?;

        let local = if resolved.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        match UdpSocket::bind(local).await {
            Ok(socket) => Some(Self {
                socket,
                addr: resolved,
            }),
            Err(err) => {
                warn!("cannot open {purpose} socket: {err}");
                None
            }
        }
    }

    async fn send(&self, payload: &str) {
        if let Err(err) = self.socket.send_to(payload.as_bytes(), self.addr).await {
            warn!(addr = %self.addr, "udp send failed: {err}");
        }
    }
}

/// Logstash-style `"<app>: <message>"` datagrams plus an alert relay.
#[derive(Debug)]
pub struct UdpNotifier {
    app_name: String,
    log: Option<Target>,
    alert: Option<Target>,
}

impl UdpNotifier {
    pub async fn new(config: &RemoteConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            log: Target::bind(config.log_addr.as_deref(), "log").await,
            alert: Target::bind(config.alert_addr.as_deref(), "alert").await,
        }
    }
}

pub fn diagnostic_line(app_name: &str, message: &str) -> String {
    format!("{app_name}: {message}")
}

pub fn alert_line(app_name: &str, kind: FailureKind, message: &str) -> String {
    format!("{app_name}: ALERT {kind}: {message}")
}

#[async_trait]
impl Notifier for UdpNotifier {
    async fn diagnostic(&self, message: &str) {
        match &self.log {
            Some(target) => target.send(&diagnostic_line(&self.app_name, message)).await,
            None => debug!(message, "remote diagnostic (no log collector configured)"),
        }
    }

    async fn alert(&self, kind: FailureKind, message: &str) {
        let line = alert_line(&self.app_name, kind, message);
        match &self.alert {
            Some(target) => target.send(&line).await,
            None => warn!("{line}"),
        }
        if let Some(log) = &self.log {
            log.send(&line).await;
        }
    }
}

/// Influx line-protocol datagram sink.
#[derive(Debug)]
pub struct MetricsSink {
    target: Option<Target>,
}

impl MetricsSink {
    pub async fn new(config: &RemoteConfig) -> Self {
        Self {
            target: Target::bind(config.metrics_addr.as_deref(), "metrics").await,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    pub async fn send(&self, line: &str) {
        match &self.target {
            Some(target) => target.send(line).await,
            None => debug!(line, "metrics line (no collector configured)"),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records everything it is handed.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub diagnostics: Mutex<Vec<String>>,
        pub alerts: Mutex<Vec<(FailureKind, String)>>,
    }

    impl RecordingNotifier {
        pub fn diagnostics(&self) -> Vec<String> {
            self.diagnostics.lock().unwrap().clone()
        }

        pub fn alerts(&self) -> Vec<(FailureKind, String)> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn diagnostic(&self, message: &str) {
            self.diagnostics.lock().unwrap().push(message.to_string());
        }

        async fn alert(&self, kind: FailureKind, message: &str) {
            self.alerts.lock().unwrap().push((kind, message.to_string()));
        }
    }
}
