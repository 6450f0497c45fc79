//! Pipeline options kept in a text file, in the same `--flag value` form the
//! CLI takes.

use std::path::Path;

use clap::Parser;
use serde_json::Value;

use crate::config::PipelineConfig;

/// `PipelineConfig` on its own. The last occurrence of a repeated option
/// wins.
#[derive(Parser)]
#[command(args_override_self = true)]
struct ConfigArgs {
    #[command(flatten)]
    config: PipelineConfig,
}

fn parse_args<I, T>(args: I) -> Result<PipelineConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let argv = std::iter::once("cloudkit".into()).chain(args.into_iter().map(Into::into));
    ConfigArgs::try_parse_from(argv).map(|args| args.config)
}

pub fn split_args_str(content: &str) -> Vec<String> {
    content.split_whitespace().map(str::to_owned).collect()
}

/// Read pipeline options from `path`. Unreadable, empty or unparsable files
/// give `None` and a warning.
pub fn load_config_from_file(path: &Path) -> Option<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .inspect_err(|e| log::warn!("Failed to read args from {}: {e}", path.display()))
        .ok()?;

    let args = split_args_str(&content);
    if args.is_empty() {
        return None;
    }

    parse_args(args)
        .inspect(|_| log::info!("Loaded pipeline options from {}", path.display()))
        .inspect_err(|e| log::warn!("Failed to parse args from {}: {e}", path.display()))
        .ok()
}

/// Command line tokens for every option of `config` that is set. Options
/// left at their default produce nothing.
pub fn config_to_args(config: &PipelineConfig) -> Vec<String> {
    let (Ok(Value::Object(set)), Ok(Value::Object(defaults))) = (
        serde_json::to_value(config),
        serde_json::to_value(PipelineConfig::default()),
    ) else {
        return Vec::new();
    };

    let mut tokens = Vec::new();
    for (key, value) in set {
        if value.is_null() || defaults.get(&key) == Some(&value) {
            continue;
        }
        match value {
            Value::Bool(false) => {}
            Value::Bool(true) => tokens.push(format!("--{key}")),
            Value::String(s) => tokens.extend([format!("--{key}"), s]),
            other => tokens.extend([format!("--{key}"), other.to_string()]),
        }
    }
    tokens
}

/// Options from `file` overlaid with options from `cli`. Where both set an
/// option the command line value is used.
pub fn merge_configs(file: &PipelineConfig, cli: &PipelineConfig) -> PipelineConfig {
    let mut tokens = config_to_args(file);
    tokens.extend(config_to_args(cli));
    parse_args(tokens).unwrap_or_else(|e| {
        log::warn!("Failed to merge args file with the command line: {e}");
        cli.clone()
    })
}
