//! Config command implementation.

use anyhow::{Context, Result};
use render_core::RenderConfig;

use super::{ConfigArgs, ConfigCommand};
use crate::output::Output;

const DEFAULT_CONFIG: &str = r#"# Render configuration

# Deadline applied to fragments that do not set their own (milliseconds).
# default_timeout_ms = 5000

[flush]
# each_segment | per_pass | threshold (with `bytes = N`)
policy = "each_segment"

[fallback]
# skip | render (with `content = "..."`) | error_text
strategy = "skip"
"#;

/// Run config command.
pub fn run(args: ConfigArgs, output: &Output) -> Result<()> {
    match args.command {
        ConfigCommand::Show { path } => show(path.as_deref(), output),
        ConfigCommand::Init => {
            print!("{}", DEFAULT_CONFIG);
            Ok(())
        }
    }
}

fn show(path: Option<&str>, output: &Output) -> Result<()> {
    let config = match path {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("Failed to load render config: {}", path))?,
        None => RenderConfig::default(),
    };

    if output.is_json() {
        output.json(&config);
    } else {
        output.debug(&format!("Source: {}", path.unwrap_or("built-in defaults")));
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config = RenderConfig::from_toml_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, RenderConfig::default());
    }
}
