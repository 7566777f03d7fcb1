//! Run command implementation.

use anyhow::{Context, Result};
use render_core::RenderConfig;
use render_executor::{RenderContext, RenderOutcome};
use render_observability::{MetricsHandle, RenderMetrics};
use render_streaming::WriterSink;
use serde::Serialize;

use super::RunArgs;
use crate::output::{format_bytes, format_micros, outcome_badge, Output};
use crate::scenario::Scenario;

/// Machine-readable result of a run.
#[derive(Debug, Serialize)]
struct RunReport {
    output: Option<String>,
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<RenderMetrics>,
}

/// Run a scenario file.
pub async fn run(args: RunArgs, output: &Output) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    let config = match &args.config {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("Failed to load render config: {}", path))?,
        None => scenario.render.clone(),
    };

    output.debug(&format!(
        "Running {} ({} steps, {} fragments)",
        args.scenario,
        scenario.steps.len(),
        scenario.fragment_count()
    ));

    let stream = args.stream && !output.is_json();
    let ctx = if stream {
        RenderContext::new(config, WriterSink::new(std::io::stdout()))
    } else {
        RenderContext::in_memory(config)
    };
    let metrics = MetricsHandle::attach(&ctx);

    ctx.begin_render();
    scenario.apply(&ctx);
    ctx.end_render();

    let outcome = ctx.finished().await;
    metrics.report();

    let snapshot = args.metrics.then(|| metrics.snapshot());
    if output.is_json() {
        output.json(&report(outcome, snapshot));
        return Ok(());
    }

    if stream {
        println!();
    } else if let Some(text) = &outcome.output {
        println!("{}", text);
    }

    for error in &outcome.errors {
        output.warn(&error.to_string());
    }

    if let Some(m) = snapshot {
        print_metrics(output, &m);
    }

    if outcome.errors.is_empty() {
        output.success("Render complete");
    }
    Ok(())
}

fn report(outcome: RenderOutcome, metrics: Option<RenderMetrics>) -> RunReport {
    RunReport {
        output: outcome.output,
        errors: outcome.errors.iter().map(ToString::to_string).collect(),
        metrics,
    }
}

fn print_metrics(output: &Output, m: &RenderMetrics) {
    output.header("Metrics");
    output.kv("Render", &m.render_id);
    output.kv(
        "Fragments",
        &format!(
            "{} declared, {} resolved, {} failed, {} timed out",
            m.fragments_declared, m.fragments_resolved, m.fragments_failed, m.fragments_timed_out
        ),
    );
    output.kv(
        "Flushed",
        &format!("{} in {} flushes", format_bytes(m.bytes_flushed as u64), m.flushes),
    );
    if let Some(us) = m.time_to_first_flush_us {
        output.kv("First flush", &format_micros(us));
    }
    if let Some(us) = m.total_duration_us {
        output.kv("Total", &format_micros(us));
    }
    for fragment in &m.fragments {
        output.list_item(&format!(
            "#{} {} in {}",
            fragment.fragment,
            outcome_badge(&fragment.outcome),
            format_micros(fragment.duration_us)
        ));
    }
}

#[cfg(test)]
mod tests {
    use render_core::{FragmentId, RenderError};

    use super::*;

    #[test]
    fn test_report_serializes_errors_as_text() {
        let outcome = RenderOutcome {
            output: Some("13".to_string()),
            errors: vec![RenderError::FragmentAbandoned {
                fragment: FragmentId(2),
            }],
        };
        let json = serde_json::to_value(report(outcome, None)).unwrap();

        assert_eq!(json["output"], "13");
        assert_eq!(json["errors"].as_array().unwrap().len(), 1);
        assert!(json.get("metrics").is_none());
    }
}
