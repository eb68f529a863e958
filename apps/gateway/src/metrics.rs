use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Method names recorded verbatim; anything else is labelled `other`.
const LABELLED_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "notifications/initialized",
    "tools/list",
    "capabilities/list",
    "tools/call",
    "session/status",
    "session/configure",
];

pub struct GatewayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    live_sessions: IntGauge,
    hibernations: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("relay".to_string()), None)?;
        let requests = IntCounterVec::new(
            Opts::new("rpc_requests_total", "JSON-RPC requests handled by method and outcome"),
            &["method", "status"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "rpc_request_duration_seconds",
                "Latency of JSON-RPC handling in seconds",
            ),
            &["method"],
        )?;
        let live_sessions = IntGauge::new("live_sessions", "Sessions held in memory")?;
        let hibernations =
            IntCounter::new("sessions_hibernated_total", "Sessions hibernated after idling")?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(live_sessions.clone()))?;
        registry.register(Box::new(hibernations.clone()))?;
        Ok(Self {
            registry,
            requests,
            latency,
            live_sessions,
            hibernations,
        })
    }

    pub fn record_request(&self, method: Option<&str>, error_code: Option<i64>, elapsed: Duration) {
        let method = match method {
            Some(method) if LABELLED_METHODS.contains(&method) => method,
            Some(_) => "other",
            None => "invalid",
        };
        let status = match error_code {
            None => "ok".to_string(),
            Some(code) => code.to_string(),
        };
        self.requests.with_label_values(&[method, &status]).inc();
        self.latency
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_live_sessions(&self, count: usize) {
        self.live_sessions.set(count as i64);
    }

    pub fn record_hibernations(&self, count: usize) {
        self.hibernations.inc_by(count as u64);
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
