//! Scripted render scenarios.
//!
//! A scenario is a list of steps replayed against a render context:
//!
//! ```toml
//! [render]
//! default_timeout_ms = 100
//!
//! [[steps]]
//! write = "1"
//!
//! [[steps]]
//! [steps.fragment]
//! delay_ms = 20
//!
//! [[steps.fragment.steps]]
//! write = "2"
//!
//! [[steps]]
//! write = "3"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use render_core::RenderConfig;
use render_executor::{FragmentOptions, RenderContext};
use serde::{Deserialize, Serialize};

/// A render script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Render settings used unless `--config` overrides them.
    #[serde(default)]
    pub render: RenderConfig,
    /// Steps applied to the root context, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Write literal text.
    Write(String),
    /// Begin an async fragment.
    Fragment(FragmentStep),
}

/// A scripted async fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentStep {
    pub name: Option<String>,
    /// Simulated work before the fragment's own steps run.
    pub delay_ms: u64,
    /// Per-fragment deadline.
    pub timeout_ms: Option<u64>,
    /// Explicit content replacing whatever the nested steps wrote.
    pub content: Option<String>,
    /// Fail with this message instead of resolving.
    pub error: Option<String>,
    /// Steps applied to the fragment's nested context.
    pub steps: Vec<Step>,
}

impl FragmentStep {
    fn options(&self) -> FragmentOptions {
        let mut options = FragmentOptions::new();
        options.name = self.name.clone();
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}

impl Scenario {
    /// Load a scenario from a TOML or JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path))?;

        if Path::new(path).extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON scenario: {}", path))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML scenario: {}", path))
        }
    }

    /// Replay every step against `ctx`.
    ///
    /// Fragments run as tokio tasks, so this must be called inside a runtime.
    pub fn apply(&self, ctx: &RenderContext) {
        apply_steps(ctx, &self.steps);
    }

    /// Number of fragments declared anywhere in the script.
    pub fn fragment_count(&self) -> usize {
        count_fragments(&self.steps)
    }
}

fn apply_steps(ctx: &RenderContext, steps: &[Step]) {
    for step in steps {
        match step {
            Step::Write(text) => {
                ctx.write(text.as_str());
            }
            Step::Fragment(fragment) => {
                let fragment = fragment.clone();
                ctx.begin_async_task(fragment.options(), move |nested| async move {
                    if fragment.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(fragment.delay_ms)).await;
                    }
                    apply_steps(&nested, &fragment.steps);
                    match fragment.error {
                        Some(message) => Err(anyhow::anyhow!(message)),
                        None => Ok(fragment.content),
                    }
                });
            }
        }
    }
}

fn count_fragments(steps: &[Step]) -> usize {
    steps
        .iter()
        .map(|step| match step {
            Step::Write(_) => 0,
            Step::Fragment(f) => 1 + count_fragments(&f.steps),
        })
        .sum()
}
