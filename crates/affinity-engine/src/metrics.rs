use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static SESSIONS_CREATED: OnceLock<IntCounter> = OnceLock::new();
static MESSAGES_TRIMMED: OnceLock<IntCounter> = OnceLock::new();
static LEVEL_UPS: OnceLock<IntCounter> = OnceLock::new();
static LLM_LATENCY: OnceLock<Histogram> = OnceLock::new();
static LLM_FAILURES: OnceLock<IntCounter> = OnceLock::new();

/// Register all collectors. Safe to call more than once; recording helpers are no-ops
/// until this has run.
pub fn init_metrics() {
    if let Err(e) = try_init() {
        warn!("Failed to initialize metrics: {}", e);
    }
}

fn try_init() -> prometheus::Result<()> {
    if REQ_COUNTER.get().is_some() {
        return Ok(());
    }

    let req_counter = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    )?;
    let sessions_created = IntCounter::new("sessions_created_total", "Sessions created")?;
    let messages_trimmed = IntCounter::new(
        "messages_trimmed_total",
        "Messages dropped by history retention",
    )?;
    let level_ups = IntCounter::new("intimacy_level_ups_total", "Intimacy level transitions")?;
    let llm_latency = Histogram::with_opts(HistogramOpts::new(
        "llm_request_seconds",
        "Completion request latency",
    ))?;
    let llm_failures = IntCounter::new("llm_failures_total", "Failed completion requests")?;

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(sessions_created.clone())).ok();
    REGISTRY.register(Box::new(messages_trimmed.clone())).ok();
    REGISTRY.register(Box::new(level_ups.clone())).ok();
    REGISTRY.register(Box::new(llm_latency.clone())).ok();
    REGISTRY.register(Box::new(llm_failures.clone())).ok();

    let _ = REQ_COUNTER.set(req_counter);
    let _ = SESSIONS_CREATED.set(sessions_created);
    let _ = MESSAGES_TRIMMED.set(messages_trimmed);
    let _ = LEVEL_UPS.set(level_ups);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_FAILURES.set(llm_failures);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_sessions_created() {
    if let Some(counter) = SESSIONS_CREATED.get() {
        counter.inc();
    }
}

pub fn add_messages_trimmed(count: usize) {
    if let Some(counter) = MESSAGES_TRIMMED.get() {
        counter.inc_by(count as u64);
    }
}

pub fn inc_level_ups() {
    if let Some(counter) = LEVEL_UPS.get() {
        counter.inc();
    }
}

pub fn observe_llm_latency(seconds: f64) {
    if let Some(histogram) = LLM_LATENCY.get() {
        histogram.observe(seconds);
    }
}

pub fn inc_llm_failures() {
    if let Some(counter) = LLM_FAILURES.get() {
        counter.inc();
    }
}

/// Text exposition of the registry.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
