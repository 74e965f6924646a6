use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus collectors for the service. One registry per `AppState`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    /// OTP requests and verifications by purpose and outcome.
    pub otp_events_total: IntCounterVec,
    pub pin_events_total: IntCounterVec,
    pub approval_decisions_total: IntCounterVec,
    /// Requests rejected by the authorization middleware, by code.
    pub access_denied_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path", "status"],
        )?;
        let otp_events_total = IntCounterVec::new(
            Opts::new("otp_events_total", "OTP issuance and verification outcomes"),
            &["purpose", "outcome"],
        )?;
        let pin_events_total = IntCounterVec::new(
            Opts::new("pin_events_total", "PIN creation and verification outcomes"),
            &["operation", "outcome"],
        )?;
        let approval_decisions_total = IntCounterVec::new(
            Opts::new("approval_decisions_total", "Admin review decisions"),
            &["action", "result"],
        )?;
        let access_denied_total = IntCounterVec::new(
            Opts::new("access_denied_total", "Requests denied by access policy"),
            &["code"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(otp_events_total.clone()))?;
        registry.register(Box::new(pin_events_total.clone()))?;
        registry.register(Box::new(approval_decisions_total.clone()))?;
        registry.register(Box::new(access_denied_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            otp_events_total,
            pin_events_total,
            approval_decisions_total,
            access_denied_total,
        })
    }

    pub fn observe_request(&self, method: &str, path: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path, &status])
            .observe(seconds);
    }

    pub fn otp_event(&self, purpose: &str, outcome: &str) {
        self.otp_events_total
            .with_label_values(&[purpose, outcome])
            .inc();
    }

    pub fn pin_event(&self, operation: &str, outcome: &str) {
        self.pin_events_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn approval_decision(&self, action: &str, result: &str) {
        self.approval_decisions_total
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn access_denied(&self, code: &str) {
        self.access_denied_total.with_label_values(&[code]).inc();
    }

    /// Text exposition of every registered collector.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return format!("# Failed to encode metrics: {}\n", e);
        }

        match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to convert metrics to UTF-8: {}", e);
                format!("# Failed to convert metrics to UTF-8: {}\n", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.otp_event("register", "issued");

        let rendered = a.render();
        assert!(rendered.contains("otp_events_total{"));
        assert!(rendered.contains("purpose=\"register\""));
        assert!(!b.render().contains("outcome=\"issued\""));
    }
}
