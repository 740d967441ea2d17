//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`BELIEFNET_*`)
//! - CLI arguments (applied by the binary on top of the above)
//!
//! The resulting [`SimulationConfig`] is immutable once a simulation is built.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backend::Provider;
use crate::error::{Result, SimError};
use crate::topology::{GridDims, Topology, TopologyKind};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BELIEFNET_";

/// Beliefs used when neither a pool nor a file is configured
pub const DEFAULT_BELIEFS: &[&str] = &[
    "I believe money is a tool for freedom, and saving aggressively buys independence.",
    "I believe experiences matter more than possessions, so money should be spent on living.",
    "I believe wealth is a responsibility and should be shared with the community.",
    "I believe financial security comes first: never spend what you have not saved.",
    "I believe money cannot buy happiness once basic needs are covered.",
    "I believe investing in yourself is the best use of money.",
];

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Iterations, rounds, seed
    #[serde(default)]
    pub simulation: RunConfig,

    /// Network shape
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Belief pool
    #[serde(default)]
    pub beliefs: BeliefConfig,

    /// LLM collaborator
    #[serde(default)]
    pub backend: BackendConfig,

    /// Retry policy for collaborator requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log persistence
    #[serde(default)]
    pub log: LogConfig,
}

impl SimulationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimError::Configuration(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        let mut config: Self = toml::from_str(&content)?;

        // Belief files are relative to the config file.
        if let (Some(file), Some(dir)) = (&config.beliefs.file, path.parent()) {
            if file.is_relative() {
                config.beliefs.file = Some(dir.join(file));
            }
        }
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `BELIEFNET_*` environment variables
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (keys include [`ENV_PREFIX`])
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(v) = get("ITERATIONS") {
            self.simulation.iterations = parse_value("ITERATIONS", &v)?;
        }
        if let Some(v) = get("ROUNDS") {
            self.simulation.rounds = parse_value("ROUNDS", &v)?;
        }
        if let Some(v) = get("SEED") {
            self.simulation.seed = parse_seed(&v)?;
        }
        if let Some(v) = get("TOPOLOGY") {
            self.topology.kind = v.parse()?;
        }
        if let Some(v) = get("AGENTS") {
            self.topology.agents = parse_value("AGENTS", &v)?;
        }
        if let Some(v) = get("BELIEFS_FILE") {
            self.beliefs.file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PROVIDER") {
            self.backend.provider = v.parse()?;
        }
        if let Some(v) = get("MODEL") {
            self.backend.model = v;
        }
        if let Some(v) = get("ENDPOINT") {
            self.backend.endpoint = Some(v);
        }
        if let Some(v) = get("TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_value("TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LOG_DIR") {
            self.log.dir = PathBuf::from(v);
        }

        Ok(self)
    }

    /// Reject inconsistent settings before anything runs
    pub fn validate(&self) -> Result<()> {
        if self.simulation.rounds == 0 {
            return Err(SimError::Configuration("rounds must be at least 1".to_string()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(SimError::Configuration("timeout_secs must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SimError::Configuration("max_attempts must be at least 1".to_string()));
        }
        if self.backend.model.trim().is_empty() {
            return Err(SimError::Configuration("model must not be empty".to_string()));
        }
        Topology::build(self.topology.kind, self.topology.agents, self.topology.dims()?)?;
        self.beliefs.resolve()?;
        Ok(())
    }

    /// Default config file location (`~/.config/beliefnet/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("beliefnet").join("config.toml"))
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        SimError::Configuration(format!("{ENV_PREFIX}{name}: invalid value {value:?}"))
    })
}

/// Parse a seed setting: a number, or `none`/`random` for an unseeded run
pub fn parse_seed(value: &str) -> Result<Option<u64>> {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "none" | "random" | "unseeded" => Ok(None),
        _ => value
            .parse()
            .map(Some)
            .map_err(|_| SimError::Configuration(format!("invalid seed: {value:?}"))),
    }
}

fn serialize_seed<S>(seed: &Option<u64>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match seed {
        Some(n) => serializer.serialize_u64(*n),
        None => serializer.serialize_str("none"),
    }
}

fn deserialize_seed<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seed {
        Fixed(u64),
        Named(String),
    }

    match Seed::deserialize(deserializer)? {
        Seed::Fixed(n) => Ok(Some(n)),
        Seed::Named(s) => parse_seed(&s).map_err(serde::de::Error::custom),
    }
}

/// Run length and randomness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Interactions to run
    pub iterations: u32,

    /// Persuader+defender exchanges per interaction
    pub rounds: u32,

    /// Fixed seed, or `None` for entropy
    #[serde(serialize_with = "serialize_seed", deserialize_with = "deserialize_seed")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 40,
            rounds: 5,
            seed: Some(42),
        }
    }
}

/// Network shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Variant
    pub kind: TopologyKind,

    /// Number of agents
    pub agents: usize,

    /// Grid rows (with `cols`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,

    /// Grid columns (with `rows`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cols: Option<usize>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            kind: TopologyKind::Grid4,
            agents: 9,
            rows: None,
            cols: None,
        }
    }
}

impl TopologyConfig {
    /// Explicit grid dimensions, if configured
    pub fn dims(&self) -> Result<Option<GridDims>> {
        match (self.rows, self.cols) {
            (Some(rows), Some(cols)) => Ok(Some(GridDims { rows, cols })),
            (None, None) => Ok(None),
            _ => Err(SimError::Configuration(
                "rows and cols must be given together".to_string(),
            )),
        }
    }
}

/// Belief pool source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {
    /// Inline beliefs
    pub pool: Vec<String>,

    /// JSON file `{"beliefs": [...]}`; takes precedence over `pool`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Deserialize)]
struct BeliefFile {
    beliefs: Vec<String>,
}

impl BeliefConfig {
    /// The pool agents draw from
    pub fn resolve(&self) -> Result<Vec<String>> {
        let pool: Vec<String> = if let Some(path) = &self.file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                SimError::Configuration(format!("Failed to read beliefs {}: {e}", path.display()))
            })?;
            let file: BeliefFile = serde_json::from_str(&content).map_err(|e| {
                SimError::Configuration(format!("Invalid beliefs file {}: {e}", path.display()))
            })?;
            file.beliefs
        } else if self.pool.is_empty() {
            DEFAULT_BELIEFS.iter().map(|b| (*b).to_string()).collect()
        } else {
            self.pool.clone()
        };

        let pool: Vec<String> = pool
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if pool.is_empty() {
            return Err(SimError::Configuration("belief pool is empty".to_string()));
        }
        Ok(pool)
    }
}

/// LLM collaborator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind
    pub provider: Provider,

    /// Model identifier
    pub model: String,

    /// Base URL; provider default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature; backend default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "gemma3".to_string(),
            endpoint: None,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: None,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first
    pub max_attempts: u32,

    /// First backoff in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Log persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for run logs
    pub dir: PathBuf,

    /// Also write the human-readable text log
    pub text_log: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            text_log: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.simulation.iterations, 40);
        assert_eq!(config.simulation.rounds, 5);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.topology.kind, TopologyKind::Grid4);
        assert_eq!(config.topology.agents, 9);
        assert_eq!(config.backend.model, "gemma3");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [simulation]
            iterations = 12
            rounds = 2
            seed = "none"

            [topology]
            kind = "grid8"
            agents = 6
            rows = 2
            cols = 3

            [beliefs]
            pool = ["I like tea", "I like coffee"]

            [backend]
            provider = "openai"
            model = "google/gemma-3-27b-it"
            temperature = 0.7
        "#;

        let config: SimulationConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.simulation.iterations, 12);
        assert_eq!(config.simulation.seed, None);
        assert_eq!(config.topology.kind, TopologyKind::Grid8);
        assert_eq!(config.topology.dims().unwrap(), Some(GridDims { rows: 2, cols: 3 }));
        assert_eq!(config.backend.provider, Provider::OpenAi);
        assert_eq!(config.backend.timeout_secs, 60);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_seed() {
        let config: SimulationConfig = toml::from_str("[simulation]\nseed = 7\n").unwrap();
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.rounds, 5);
    }

    #[test]
    fn test_unseeded_config_prints_none() {
        let mut config = SimulationConfig::default();
        config.simulation.seed = None;
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("seed = \"none\""));

        let parsed: SimulationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.simulation.seed, None);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("BELIEFNET_ROUNDS", "3"),
            ("BELIEFNET_TOPOLOGY", "ring"),
            ("BELIEFNET_AGENTS", "5"),
            ("BELIEFNET_SEED", "random"),
            ("BELIEFNET_PROVIDER", "scripted"),
        ]
        .into_iter()
        .collect();

        let config = SimulationConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.simulation.rounds, 3);
        assert_eq!(config.topology.kind, TopologyKind::Ring);
        assert_eq!(config.topology.agents, 5);
        assert_eq!(config.simulation.seed, None);
        assert_eq!(config.backend.provider, Provider::Scripted);
    }

    #[test]
    fn test_bad_override_rejected() {
        let result = SimulationConfig::default().with_overrides_from(|k| {
            (k == "BELIEFNET_ROUNDS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let mut config = SimulationConfig::default();
        config.simulation.rounds = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.topology.agents = 10;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.topology.kind = TopologyKind::Ring;
        config.topology.agents = 2;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.topology.rows = Some(3);
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.beliefs.pool = vec!["  ".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_beliefs_file_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let beliefs = dir.path().join("money.json");
        std::fs::write(&beliefs, r#"{"beliefs": ["I save", "I spend"]}"#).unwrap();

        let config_path = dir.path().join("beliefnet.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "[beliefs]\nfile = \"money.json\"").unwrap();

        let config = SimulationConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.beliefs.resolve().unwrap(),
            vec!["I save".to_string(), "I spend".to_string()]
        );
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[simulation\nrounds = 2\n").unwrap();

        match SimulationConfig::from_file(&path) {
            Err(SimError::Configuration(msg)) => assert!(msg.contains("Failed to parse config")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_default_pool_used_when_empty() {
        let pool = BeliefConfig::default().resolve().unwrap();
        assert_eq!(pool.len(), DEFAULT_BELIEFS.len());
    }
}
