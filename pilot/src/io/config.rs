//! Pilot configuration stored as TOML (default `pilot.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::fusion::FusionConfig;
use crate::core::rules::default_rules;
use crate::core::state::StateConfig;
use crate::core::types::{Economy, Hero, HeroCatalog, MAX_HERO_COST};

/// Pilot configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values tuned
/// for a 1920x1080 reference client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    /// Rule names to skip. Remaining rules keep their order.
    pub disabled_rules: Vec<String>,
    pub cycle: CycleConfig,
    pub fusion: FusionConfig,
    pub state: StateConfig,
    pub external: ExternalConfig,
    pub execution: ExecutionConfig,
    pub economy: Economy,
    pub safety: SafetyConfig,
    pub log: LogConfig,
    /// Hero costs and synergies used to read the shop.
    pub heroes: Vec<Hero>,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            disabled_rules: Vec::new(),
            cycle: CycleConfig::default(),
            fusion: FusionConfig::default(),
            state: StateConfig::default(),
            external: ExternalConfig::default(),
            execution: ExecutionConfig::default(),
            economy: Economy::default(),
            safety: SafetyConfig::default(),
            log: LogConfig::default(),
            heroes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleConfig {
    /// Sleep between control cycles.
    pub interval_ms: u64,
    /// Stop after this many cycles. Unbounded when absent.
    pub max_cycles: Option<u64>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_cycles: None,
        }
    }
}

impl CycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Rules only; unmatched cycles degrade to inaction.
    None,
    /// Spawn a command that reads the prompt on stdin.
    Command,
    /// Call an Anthropic or OpenAI-compatible HTTP API.
    Http,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExternalConfig {
    pub provider: ProviderKind,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt for transient provider failures.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub backoff_ms: u64,
    /// Attempts allowed for the whole session.
    pub session_budget: u32,
    /// Confidence assigned when the provider reports none.
    pub default_confidence: f64,
    pub command: CommandProviderConfig,
    pub http: HttpProviderConfig,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            timeout_ms: 30_000,
            max_retries: 2,
            backoff: Backoff::Fixed,
            backoff_ms: 500,
            session_budget: 50,
            default_confidence: 1.0,
            command: CommandProviderConfig::default(),
            http: HttpProviderConfig::default(),
        }
    }
}

impl ExternalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.backoff_ms);
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                base.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandProviderConfig {
    /// Command and arguments (e.g. `["llm", "-m", "model"]`).
    pub argv: Vec<String>,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandProviderConfig {
    fn default() -> Self {
        Self {
            argv: Vec::new(),
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpProviderConfig {
    pub api_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-3-haiku-20240307".to_string(),
            api_key_env: "PILOT_API_KEY".to_string(),
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Random delay before each input event, inclusive bounds.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Random pixel offset applied to tap targets (logical units).
    pub pixel_jitter_x: u32,
    pub pixel_jitter_y: u32,
    pub drag_duration_ms: u64,
    pub queue_capacity: usize,
    /// Fixed seed for reproducible jitter. Random when absent.
    pub seed: Option<u64>,
    /// Keep at most this many execution records.
    pub history_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jitter_min_ms: 50,
            jitter_max_ms: 200,
            pixel_jitter_x: 10,
            pixel_jitter_y: 5,
            drag_duration_ms: 300,
            queue_capacity: 8,
            seed: None,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Dispatches allowed in any sliding 60s window. Zero disables the gate.
    pub max_actions_per_minute: u32,
    /// Stop the loop after this much wall-clock time.
    pub max_runtime_secs: Option<u64>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_actions_per_minute: 30,
            max_runtime_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Append one JSON line per cycle here.
    pub cycle_log: Option<PathBuf>,
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle.interval_ms == 0 {
            return Err(anyhow!("cycle.interval_ms must be > 0"));
        }
        for (name, value) in [
            ("fusion.min_confidence", self.fusion.min_confidence),
            (
                "state.min_numeric_confidence",
                self.state.min_numeric_confidence,
            ),
            (
                "external.default_confidence",
                self.external.default_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1]"));
            }
        }
        if self.state.bench_capacity == 0 || self.state.bench_capacity > usize::from(u8::MAX) {
            return Err(anyhow!("state.bench_capacity must be within 1..=255"));
        }
        if self.external.timeout_ms == 0 {
            return Err(anyhow!("external.timeout_ms must be > 0"));
        }
        match self.external.provider {
            ProviderKind::None => {}
            ProviderKind::Command => {
                let argv = &self.external.command.argv;
                if argv.is_empty() || argv[0].trim().is_empty() {
                    return Err(anyhow!("external.command.argv must be a non-empty array"));
                }
                if self.external.command.output_limit_bytes == 0 {
                    return Err(anyhow!("external.command.output_limit_bytes must be > 0"));
                }
            }
            ProviderKind::Http => {
                if self.external.http.api_url.trim().is_empty() {
                    return Err(anyhow!("external.http.api_url must be set"));
                }
                if self.external.http.model.trim().is_empty() {
                    return Err(anyhow!("external.http.model must be set"));
                }
            }
        }
        if self.execution.jitter_min_ms > self.execution.jitter_max_ms {
            return Err(anyhow!(
                "execution.jitter_min_ms must not exceed execution.jitter_max_ms"
            ));
        }
        if self.execution.queue_capacity == 0 {
            return Err(anyhow!("execution.queue_capacity must be > 0"));
        }
        if self.economy.max_level == 0 {
            return Err(anyhow!("economy.max_level must be > 0"));
        }
        let known: Vec<&str> = default_rules().iter().map(|rule| rule.name).collect();
        for name in &self.disabled_rules {
            if !known.contains(&name.as_str()) {
                return Err(anyhow!(
                    "disabled_rules: unknown rule {name:?} (known: {})",
                    known.join(", ")
                ));
            }
        }
        for hero in &self.heroes {
            if hero.name.trim().is_empty() {
                return Err(anyhow!("heroes: name must be non-empty"));
            }
            if hero.cost == 0 || hero.cost > MAX_HERO_COST {
                return Err(anyhow!(
                    "heroes: {} cost must be within 1..={MAX_HERO_COST}",
                    hero.name
                ));
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> HeroCatalog {
        HeroCatalog::new(self.heroes.iter().cloned())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PilotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        let cfg = PilotConfig {
            disabled_rules: vec!["refresh_for_upgrades".to_string()],
            heroes: vec![Hero {
                name: "Garen".to_string(),
                cost: 1,
                synergies: vec!["Knight".to_string()],
            }],
            ..PilotConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        fs::write(
            &path,
            "[external]\nprovider = \"command\"\nmax_retries = 1\n\n[external.command]\nargv = [\"cat\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.external.provider, ProviderKind::Command);
        assert_eq!(cfg.external.max_retries, 1);
        assert_eq!(cfg.external.timeout_ms, 30_000);
        assert_eq!(cfg.cycle, CycleConfig::default());
    }

    #[test]
    fn validate_rejects_unknown_rule_and_bad_jitter() {
        let cfg = PilotConfig {
            disabled_rules: vec!["win_game".to_string()],
            ..PilotConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = PilotConfig::default();
        cfg.execution.jitter_min_ms = 300;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn command_provider_requires_argv() {
        let mut cfg = PilotConfig::default();
        cfg.external.provider = ProviderKind::Command;
        assert!(cfg.validate().is_err());
        cfg.external.command.argv = vec!["cat".to_string()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn exponential_backoff_doubles() {
        let mut external = ExternalConfig {
            backoff_ms: 100,
            ..ExternalConfig::default()
        };
        assert_eq!(external.backoff_delay(3), Duration::from_millis(100));
        external.backoff = Backoff::Exponential;
        assert_eq!(external.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(external.backoff_delay(3), Duration::from_millis(400));
    }
}
