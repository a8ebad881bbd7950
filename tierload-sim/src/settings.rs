//! Command-line and environment settings.
//!
//! Flags take precedence over environment variables:
//!
//! | flag | env | meaning |
//! |------|-----|---------|
//! | `--config <path>` | `TIERLOAD_CONFIG` | TOML loader config |
//! | `--cache <path>` | `TIERLOAD_CACHE_PATH` | cache snapshot restored on start, saved on exit |
//! | `--failure-rate <0..1>` | `TIERLOAD_SIM_FAILURE_RATE` | chance a synthetic fetch fails |
//! | `--latency-ms <n>` | `TIERLOAD_SIM_LATENCY_MS` | upper bound of synthetic latency |
//! | `--json` | `TIERLOAD_LOG_JSON` | JSON log lines |

use crate::error::SimError;
use std::path::PathBuf;
use tierload_core::LoaderConfig;

const DEFAULT_FAILURE_RATE: f64 = 0.2;
const DEFAULT_LATENCY_MS: u64 = 150;

#[derive(Debug, Clone, PartialEq)]
pub struct SimSettings {
    pub config_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub failure_rate: f64,
    pub max_latency_ms: u64,
    pub json_logs: bool,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            cache_path: None,
            failure_rate: DEFAULT_FAILURE_RATE,
            max_latency_ms: DEFAULT_LATENCY_MS,
            json_logs: false,
        }
    }
}

impl SimSettings {
    pub fn load() -> Result<Self, SimError> {
        Self::parse(std::env::args().skip(1), |name| std::env::var(name).ok())
    }

    /// Build settings from `args` (program name already stripped) and an
    /// environment lookup.
    pub fn parse<I, E>(args: I, env: E) -> Result<Self, SimError>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut settings = Self {
            config_path: env("TIERLOAD_CONFIG").map(PathBuf::from),
            cache_path: env("TIERLOAD_CACHE_PATH").map(PathBuf::from),
            json_logs: env("TIERLOAD_LOG_JSON").is_some_and(|v| is_truthy(&v)),
            ..Self::default()
        };
        if let Some(raw) = env("TIERLOAD_SIM_FAILURE_RATE") {
            settings.failure_rate = parse_rate(&raw)?;
        }
        if let Some(raw) = env("TIERLOAD_SIM_LATENCY_MS") {
            settings.max_latency_ms = parse_latency(&raw)?;
        }

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    settings.config_path = Some(PathBuf::from(value(&mut args, "--config")?))
                }
                "--cache" => {
                    settings.cache_path = Some(PathBuf::from(value(&mut args, "--cache")?))
                }
                "--failure-rate" => {
                    settings.failure_rate = parse_rate(&value(&mut args, "--failure-rate")?)?
                }
                "--latency-ms" => {
                    settings.max_latency_ms = parse_latency(&value(&mut args, "--latency-ms")?)?
                }
                "--json" => settings.json_logs = true,
                other => {
                    return Err(SimError::InvalidArgument {
                        name: "argument",
                        reason: format!("unrecognized flag {other}"),
                    })
                }
            }
        }
        Ok(settings)
    }

    /// Loader config from the TOML file if given, with environment overrides
    /// applied on top.
    pub fn loader_config(&self) -> Result<LoaderConfig, SimError> {
        let config = match &self.config_path {
            Some(path) => LoaderConfig::from_path(path)?.overlay_env(),
            None => LoaderConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<String, SimError> {
    args.next().ok_or_else(|| SimError::InvalidArgument {
        name: flag,
        reason: "missing value".to_string(),
    })
}

fn parse_rate(raw: &str) -> Result<f64, SimError> {
    let rate: f64 = raw.trim().parse().map_err(|_| SimError::InvalidArgument {
        name: "failure_rate",
        reason: format!("{raw} is not a number"),
    })?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(SimError::InvalidArgument {
            name: "failure_rate",
            reason: format!("{rate} is outside 0..=1"),
        });
    }
    Ok(rate)
}

fn parse_latency(raw: &str) -> Result<u64, SimError> {
    raw.trim().parse().map_err(|_| SimError::InvalidArgument {
        name: "latency_ms",
        reason: format!("{raw} is not a whole number of milliseconds"),
    })
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
