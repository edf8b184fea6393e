use super::reco::RecoConfig;
use crate::geometry::GeometryConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Both,
}

impl OutputFormat {
    pub fn includes_text(self) -> bool {
        matches!(self, OutputFormat::Text | OutputFormat::Both)
    }

    pub fn includes_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    fn parse(value: &str) -> Result<Self, String> {
        match value {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "both" => Ok(OutputFormat::Both),
            other => Err(format!("Unknown output format '{other}' (text|json|both)")),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    /// Accepted tracks of every event.
    pub tracks_json: Option<PathBuf>,
    /// Event reports and the run summary.
    pub report_json: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Configuration of the `reco_demo` tool.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// JSON file holding the events of raw hits.
    pub input_path: PathBuf,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub reco: RecoConfig,
    pub geometry: GeometryConfig,
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let mut config: RuntimeConfig = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
    config
        .reco
        .validate()
        .map_err(|e| format!("Invalid config {}: {e}", path.display()))?;
    if config.input_path.is_relative() {
        if let Some(dir) = path.parent() {
            config.input_path = dir.join(&config.input_path);
        }
    }
    Ok(config)
}

pub fn usage(program: &str) -> String {
    format!("Usage: {program} <config.json> [--format text|json|both]")
}

/// Reads `<config.json> [--format F]` from the process arguments.
pub fn parse_cli(program: &str) -> Result<RuntimeConfig, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args(program, &args)
}

pub fn parse_args(program: &str, args: &[String]) -> Result<RuntimeConfig, String> {
    let mut config_path = None;
    let mut format = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                let value = iter
                    .next()
                    .ok_or_else(|| format!("--format needs a value\n{}", usage(program)))?;
                format = Some(OutputFormat::parse(value)?);
            }
            "-h" | "--help" => return Err(usage(program)),
            other if config_path.is_none() => config_path = Some(PathBuf::from(other)),
            other => return Err(format!("Unexpected argument '{other}'\n{}", usage(program))),
        }
    }
    let path = config_path.ok_or_else(|| usage(program))?;
    let mut config = load_config(&path)?;
    if let Some(format) = format {
        config.output.format = format;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_flags() {
        assert!(OutputFormat::Both.includes_text());
        assert!(OutputFormat::Both.includes_json());
        assert!(!OutputFormat::Json.includes_text());
        assert!(!OutputFormat::Text.includes_json());
        assert!(OutputFormat::parse("yaml").is_err());
    }

    #[test]
    fn runtime_config_fills_defaults() {
        let json = r#"{
            "inputPath": "events.json",
            "geometry": { "planes": [ { "layerId": 1, "center": [10.0, 0.0, 0.0] } ] }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.reco, RecoConfig::default());
        assert_eq!(config.geometry.planes[0].half_v, 50.0);
    }

    #[test]
    fn missing_config_argument_prints_usage() {
        let err = parse_args("reco_demo", &[]).unwrap_err();
        assert!(err.starts_with("Usage: reco_demo"));
        let err = parse_args("reco_demo", &["a.json".into(), "--format".into()]).unwrap_err();
        assert!(err.contains("--format needs a value"));
    }
}
