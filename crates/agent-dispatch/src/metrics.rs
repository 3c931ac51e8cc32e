// agent-dispatch/crates/agent-dispatch/src/metrics.rs

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static TURNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static ROUTING_FALLBACKS: OnceLock<IntCounter> = OnceLock::new();
static SANDBOX_RUNS: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_TURNS: OnceLock<IntGauge> = OnceLock::new();
static TURN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Register every collector. Recording before this call is a no-op.
pub fn init_metrics() {
    let turns = TURNS_TOTAL.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("turns_total", "Completed turns per routed agent and outcome"),
            &["agent", "outcome"],
        )
        .unwrap()
    });

    let fallbacks = ROUTING_FALLBACKS.get_or_init(|| {
        IntCounter::new(
            "routing_fallbacks_total",
            "Router decisions forced to general after an invalid label or gateway error",
        )
        .unwrap()
    });

    let sandbox_runs = SANDBOX_RUNS.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("sandbox_runs_total", "Analytics sandbox executions by outcome"),
            &["outcome"],
        )
        .unwrap()
    });

    let active = ACTIVE_TURNS.get_or_init(|| {
        IntGauge::new("active_turns", "Turns currently being processed").unwrap()
    });

    let duration = TURN_DURATION.get_or_init(|| {
        Histogram::with_opts(HistogramOpts::new(
            "turn_duration_seconds",
            "Wall time from request to end of stream",
        ))
        .unwrap()
    });

    REGISTRY.register(Box::new(turns.clone())).ok();
    REGISTRY.register(Box::new(fallbacks.clone())).ok();
    REGISTRY.register(Box::new(sandbox_runs.clone())).ok();
    REGISTRY.register(Box::new(active.clone())).ok();
    REGISTRY.register(Box::new(duration.clone())).ok();
}

pub fn inc_turn(agent: &str, outcome: &str) {
    if let Some(counter) = TURNS_TOTAL.get() {
        counter.with_label_values(&[agent, outcome]).inc();
    }
}

pub fn inc_routing_fallback() {
    if let Some(counter) = ROUTING_FALLBACKS.get() {
        counter.inc();
    }
}

pub fn inc_sandbox_run(outcome: &str) {
    if let Some(counter) = SANDBOX_RUNS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_active_turns() {
    if let Some(gauge) = ACTIVE_TURNS.get() {
        gauge.inc();
    }
}

pub fn dec_active_turns() {
    if let Some(gauge) = ACTIVE_TURNS.get() {
        gauge.dec();
    }
}

pub fn observe_turn_duration(seconds: f64) {
    if let Some(histogram) = TURN_DURATION.get() {
        histogram.observe(seconds);
    }
}

/// Text exposition of the registry.
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_after_recording() {
        init_metrics();
        init_metrics();
        inc_turn("coding", "completed");
        inc_routing_fallback();
        inc_sandbox_run("output");
        observe_turn_duration(0.25);

        let text = String::from_utf8(render().unwrap()).unwrap();
        assert!(text.contains("turns_total"));
        assert!(text.contains("agent=\"coding\""));
        assert!(text.contains("routing_fallbacks_total"));
        assert!(text.contains("sandbox_runs_total"));
        assert!(text.contains("turn_duration_seconds"));
    }
}
