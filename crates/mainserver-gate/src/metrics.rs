use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

lazy_static::lazy_static! {
    pub static ref CHECKS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        Opts::new(
            "mainserver_gate_checks_total",
            "Total number of server availability checks"
        ),
        &["outcome"]
    )
    .unwrap();

    pub static ref CHECK_DURATION: HistogramVec = prometheus::register_histogram_vec!(
        HistogramOpts::new(
            "mainserver_gate_check_duration_seconds",
            "Duration of server availability checks in seconds"
        ),
        &["outcome"]
    )
    .unwrap();

    pub static ref READY: IntGauge = prometheus::register_int_gauge!(
        "mainserver_gate_ready",
        "1 once the server has been confirmed available"
    )
    .unwrap();
}

pub fn observe_check(outcome: &str, duration_secs: f64) {
    CHECKS_TOTAL.with_label_values(&[outcome]).inc();
    CHECK_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn set_ready(ready: bool) {
    READY.set(i64::from(ready));
}

pub fn check_count(outcome: &str) -> u64 {
    CHECKS_TOTAL.with_label_values(&[outcome]).get()
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
