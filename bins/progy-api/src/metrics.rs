// Prometheus metrics exposed on GET /metrics
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Exercise runs by outcome: pass, fail or error (aborted before an attempt)
    pub static ref EXERCISE_RUNS: IntCounterVec = register_int_counter_vec!(
        "progy_exercise_runs_total",
        "Exercise runs by outcome",
        &["outcome"]
    )
    .expect("exercise run counter registers once");

    pub static ref RUN_DURATION: Histogram = register_histogram!(
        "progy_exercise_run_duration_seconds",
        "Wall time of a full exercise run",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0]
    )
    .expect("run duration histogram registers once");

    pub static ref TUTOR_ESCALATIONS: IntCounter = register_int_counter!(
        "progy_tutor_escalations_total",
        "Tutor escalations triggered by repeated failures"
    )
    .expect("tutor escalation counter registers once");
}

pub fn record_run(outcome: &str, seconds: f64) {
    EXERCISE_RUNS.with_label_values(&[outcome]).inc();
    RUN_DURATION.observe(seconds);
}

/// Text exposition of the default registry
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
