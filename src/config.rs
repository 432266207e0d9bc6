//! Configuration for pipeguard.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GEMINI_API_KEY, GEMINI_MODEL, GEMINI_API_URL,
//!    PIPEGUARD_BIND, PIPEGUARD_PIPELINE)
//! 2. Config file (.pipeguard/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - `--config` or PIPEGUARD_CONFIG, when given
//! - Searches current directory and parents for .pipeguard/config.yaml
//! - Falls back to ~/.pipeguard/config.yaml
//! - Paths in config file are relative to the project root (parent of .pipeguard/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::SafetyLimits;
use crate::llm::DEFAULT_MODEL;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".pipeguard";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub privacy: PrivacyConfig,
    pub limits: SafetyLimits,
    /// Pipeline document (relative to the project root)
    pub pipeline: Option<String>,
    /// Remote tool servers
    pub servers: Vec<RemoteServerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub cors_origins: Vec<String>,
    pub probe_timeout_seconds: Option<u64>,
    pub health_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<LlmProvider>,
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub enabled: Option<bool>,
    pub session_idle_seconds: Option<u64>,
    pub sweep_interval_seconds: Option<u64>,
}

/// Which language-model client to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Gemini,
    /// Returns the prompt unchanged (offline use)
    Echo,
}

/// A remote tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_server_timeout")]
    pub timeout_seconds: u64,
}

fn default_server_timeout() -> u64 {
    10
}

/// Resolved configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub privacy: PrivacySettings,
    pub limits: SafetyLimits,
    /// Absolute path to the pipeline document (if configured)
    pub pipeline: Option<PathBuf>,
    pub servers: Vec<RemoteServerConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub bind: String,
    /// Empty means any origin
    pub cors_origins: Vec<String>,
    /// Bound on one tool-server probe or catalogue fetch
    pub probe_timeout_seconds: u64,
    /// How often `serve` re-checks tool servers; 0 disables the monitor
    pub health_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivacySettings {
    pub enabled: bool,
    pub session_idle_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            cors_origins: Vec::new(),
            probe_timeout_seconds: 5,
            health_interval_seconds: 30,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            model: DEFAULT_MODEL.to_string(),
            api_url: None,
            api_key: None,
            timeout_seconds: 60,
        }
    }
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            session_idle_seconds: 1800,
            sweep_interval_seconds: 60,
        }
    }
}

impl ResolvedConfig {
    /// YAML rendering with secrets elided
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.llm.api_key.is_some() {
            shown.llm.api_key = Some("<redacted>".to_string());
        }
        if let Some(url) = shown.llm.api_url.as_mut() {
            if let Some(idx) = url.find("key=") {
                url.truncate(idx + 4);
                url.push_str("<redacted>");
            }
        }
        serde_yaml::to_string(&shown).context("Failed to render configuration")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Locate the config file: explicit path, then discovery, then the home directory
fn locate_config_file(explicit: Option<&Path>, env: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env("PIPEGUARD_CONFIG") {
        return Some(PathBuf::from(path));
    }
    if let Some(found) = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_file_from(&cwd))
    {
        return Some(found);
    }
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|p| p.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Project root for a config file: the parent of `.pipeguard/`, or the file's own directory
fn base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|n| n == CONFIG_DIR) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Merge file values and environment overrides over defaults
fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    env: &dyn Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let base = config_file
        .as_deref()
        .map(base_dir)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let server_defaults = ServerSettings::default();
    let server = ServerSettings {
        bind: env("PIPEGUARD_BIND")
            .or(file.server.bind)
            .unwrap_or(server_defaults.bind),
        cors_origins: file.server.cors_origins,
        probe_timeout_seconds: file
            .server
            .probe_timeout_seconds
            .unwrap_or(server_defaults.probe_timeout_seconds),
        health_interval_seconds: file
            .server
            .health_interval_seconds
            .unwrap_or(server_defaults.health_interval_seconds),
    };

    let llm_defaults = LlmSettings::default();
    let llm = LlmSettings {
        provider: file.llm.provider.unwrap_or(llm_defaults.provider),
        model: env("GEMINI_MODEL")
            .or(file.llm.model)
            .unwrap_or(llm_defaults.model),
        api_url: env("GEMINI_API_URL").or(file.llm.api_url),
        api_key: env("GEMINI_API_KEY").or(file.llm.api_key),
        timeout_seconds: file
            .llm
            .timeout_seconds
            .unwrap_or(llm_defaults.timeout_seconds),
    };

    let privacy_defaults = PrivacySettings::default();
    let privacy = PrivacySettings {
        enabled: file.privacy.enabled.unwrap_or(privacy_defaults.enabled),
        session_idle_seconds: file
            .privacy
            .session_idle_seconds
            .unwrap_or(privacy_defaults.session_idle_seconds),
        sweep_interval_seconds: file
            .privacy
            .sweep_interval_seconds
            .unwrap_or(privacy_defaults.sweep_interval_seconds),
    };

    let pipeline = env("PIPEGUARD_PIPELINE")
        .map(PathBuf::from)
        .or_else(|| file.pipeline.as_deref().map(|p| resolve_path(&base, p)));

    ResolvedConfig {
        config_file,
        server,
        llm,
        privacy,
        limits: file.limits,
        pipeline,
        servers: file.servers,
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Load configuration from all sources
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = locate_config_file(explicit, &process_env);
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    Ok(resolve(file, config_file, &process_env))
}

/// Initialise the global configuration from an explicit file (first call wins)
pub fn init(explicit: Option<&Path>) -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config(explicit).map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    init(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SAMPLE: &str = r#"
server:
  bind: 0.0.0.0:9000
  cors_origins: ["http://localhost:5173"]
  health_interval_seconds: 0
llm:
  provider: echo
  model: gemini-1.5-pro
  timeout_seconds: 20
privacy:
  session_idle_seconds: 600
limits:
  max_steps_per_stage: 4
pipeline: mcp_config.json
servers:
  - name: search
    url: http://localhost:7000
"#;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", SAMPLE).unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.server.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.llm.provider, Some(LlmProvider::Echo));
        assert_eq!(config.limits.max_steps_per_stage, 4);
        assert_eq!(config.servers[0].timeout_seconds, 10);

        let resolved = resolve(config, Some(config_path), &env_from(&[]));
        assert_eq!(resolved.server.bind, "0.0.0.0:9000");
        assert_eq!(resolved.server.health_interval_seconds, 0);
        assert_eq!(resolved.server.probe_timeout_seconds, 5);
        assert_eq!(resolved.llm.model, "gemini-1.5-pro");
        assert_eq!(resolved.privacy.session_idle_seconds, 600);
        assert!(resolved.privacy.enabled);
        assert_eq!(resolved.pipeline, Some(temp.path().join("mcp_config.json")));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(SAMPLE).unwrap();
        let env = env_from(&[
            ("GEMINI_MODEL", "gemini-2.0-flash"),
            ("GEMINI_API_KEY", "secret"),
            ("PIPEGUARD_BIND", "127.0.0.1:1"),
            ("PIPEGUARD_PIPELINE", "/etc/pipeline.yaml"),
        ]);

        let resolved = resolve(file, None, &env);
        assert_eq!(resolved.llm.model, "gemini-2.0-flash");
        assert_eq!(resolved.llm.api_key.as_deref(), Some("secret"));
        assert_eq!(resolved.server.bind, "127.0.0.1:1");
        assert_eq!(resolved.pipeline, Some(PathBuf::from("/etc/pipeline.yaml")));
    }

    #[test]
    fn test_defaults_without_file() {
        let resolved = resolve(ConfigFile::default(), None, &env_from(&[]));
        assert_eq!(resolved.server.bind, "127.0.0.1:8000");
        assert_eq!(resolved.llm.provider, LlmProvider::Gemini);
        assert_eq!(resolved.llm.model, DEFAULT_MODEL);
        assert!(resolved.pipeline.is_none());
        assert!(resolved.servers.is_empty());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            find_config_file_from(&nested),
            Some(dir.join(CONFIG_FILE))
        );
    }

    #[test]
    fn test_explicit_path_wins() {
        let env = env_from(&[("PIPEGUARD_CONFIG", "/from/env.yaml")]);
        assert_eq!(
            locate_config_file(Some(Path::new("/explicit.yaml")), &env),
            Some(PathBuf::from("/explicit.yaml"))
        );
        assert_eq!(
            locate_config_file(None, &env),
            Some(PathBuf::from("/from/env.yaml"))
        );
    }

    #[test]
    fn test_redacted_yaml_hides_key() {
        let env = env_from(&[
            ("GEMINI_API_KEY", "super-secret"),
            ("GEMINI_API_URL", "https://example.test/gen?key=super-secret"),
        ]);
        let resolved = resolve(ConfigFile::default(), None, &env);
        let yaml = resolved.to_redacted_yaml().unwrap();
        assert!(!yaml.contains("super-secret"));
        assert!(yaml.contains("<redacted>"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
