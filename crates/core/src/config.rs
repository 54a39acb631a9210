use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub scriptwriter: ScriptwriterConfig,
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Primary conversational model, spoken to over the local chat protocol.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Secondary model used only for authoring escalation queries and scripts.
#[derive(Clone, Debug)]
pub struct ScriptwriterConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub timeout_secs: u64,
    pub max_operations: u64,
    pub max_result_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub scriptwriter_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://opsdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "qwen2.5:14b".to_string(),
                timeout_secs: 120,
                max_retries: 2,
            },
            scriptwriter: ScriptwriterConfig {
                api_key: None,
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                max_tokens: 2000,
                timeout_secs: 60,
            },
            sandbox: SandboxConfig {
                timeout_secs: 30,
                max_operations: 5_000_000,
                max_result_bytes: 50 * 1024,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("opsdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(scriptwriter) = patch.scriptwriter {
            if let Some(api_key_value) = scriptwriter.api_key {
                self.scriptwriter.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = scriptwriter.base_url {
                self.scriptwriter.base_url = base_url;
            }
            if let Some(model) = scriptwriter.model {
                self.scriptwriter.model = model;
            }
            if let Some(max_tokens) = scriptwriter.max_tokens {
                self.scriptwriter.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = scriptwriter.timeout_secs {
                self.scriptwriter.timeout_secs = timeout_secs;
            }
        }

        if let Some(sandbox) = patch.sandbox {
            if let Some(timeout_secs) = sandbox.timeout_secs {
                self.sandbox.timeout_secs = timeout_secs;
            }
            if let Some(max_operations) = sandbox.max_operations {
                self.sandbox.max_operations = max_operations;
            }
            if let Some(max_result_bytes) = sandbox.max_result_bytes {
                self.sandbox.max_result_bytes = max_result_bytes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OPSDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OPSDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("OPSDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OPSDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OPSDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSDESK_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("OPSDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("OPSDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("OPSDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("OPSDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("OPSDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("OPSDESK_SCRIPTWRITER_API_KEY") {
            self.scriptwriter.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPSDESK_SCRIPTWRITER_BASE_URL") {
            self.scriptwriter.base_url = value;
        }
        if let Some(value) = read_env("OPSDESK_SCRIPTWRITER_MODEL") {
            self.scriptwriter.model = value;
        }
        if let Some(value) = read_env("OPSDESK_SCRIPTWRITER_MAX_TOKENS") {
            self.scriptwriter.max_tokens = parse_u32("OPSDESK_SCRIPTWRITER_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("OPSDESK_SCRIPTWRITER_TIMEOUT_SECS") {
            self.scriptwriter.timeout_secs =
                parse_u64("OPSDESK_SCRIPTWRITER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSDESK_SANDBOX_TIMEOUT_SECS") {
            self.sandbox.timeout_secs = parse_u64("OPSDESK_SANDBOX_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("OPSDESK_SANDBOX_MAX_OPERATIONS") {
            self.sandbox.max_operations = parse_u64("OPSDESK_SANDBOX_MAX_OPERATIONS", &value)?;
        }
        if let Some(value) = read_env("OPSDESK_SANDBOX_MAX_RESULT_BYTES") {
            self.sandbox.max_result_bytes =
                parse_u64("OPSDESK_SANDBOX_MAX_RESULT_BYTES", &value)? as usize;
        }

        let log_level =
            read_env("OPSDESK_LOGGING_LEVEL").or_else(|| read_env("OPSDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OPSDESK_LOGGING_FORMAT").or_else(|| read_env("OPSDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(api_key) = overrides.scriptwriter_api_key {
            self.scriptwriter.api_key = Some(secret_value(api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_scriptwriter(&self.scriptwriter)?;
        validate_sandbox(&self.sandbox)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("opsdesk.toml"), PathBuf::from("config/opsdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Substitute `${VAR}` expressions in raw TOML with environment values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    static EXPR: OnceLock<Regex> = OnceLock::new();
    let expr = EXPR
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env pattern"));

    // A lone `${` with no closing brace is a config mistake worth naming.
    if let Some(start) = input.find("${") {
        if !input[start..].contains('}') {
            return Err(ConfigError::UnterminatedInterpolation);
        }
    }

    let mut missing: Option<String> = None;
    let output = expr.replace_all(input, |captures: &regex::Captures<'_>| {
        let var = &captures[1];
        match env::var(var) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvInterpolation { var }),
        None => Ok(output.into_owned()),
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("llm.base_url must not be empty".to_string()));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_scriptwriter(scriptwriter: &ScriptwriterConfig) -> Result<(), ConfigError> {
    if scriptwriter.base_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "scriptwriter.base_url must not be empty".to_string(),
        ));
    }
    if scriptwriter.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "scriptwriter.max_tokens must be greater than zero".to_string(),
        ));
    }
    if scriptwriter.timeout_secs == 0 || scriptwriter.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "scriptwriter.timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    if let Some(api_key) = &scriptwriter.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "scriptwriter.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_sandbox(sandbox: &SandboxConfig) -> Result<(), ConfigError> {
    if sandbox.timeout_secs == 0 || sandbox.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "sandbox.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if sandbox.max_operations == 0 {
        return Err(ConfigError::Validation(
            "sandbox.max_operations must be greater than zero".to_string(),
        ));
    }
    if sandbox.max_result_bytes == 0 {
        return Err(ConfigError::Validation(
            "sandbox.max_result_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    parse_env(key, value)
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    parse_env(key, value)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    scriptwriter: Option<ScriptwriterPatch>,
    sandbox: Option<SandboxPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptwriterPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxPatch {
    timeout_secs: Option<u64>,
    max_operations: Option<u64>,
    max_result_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
