// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:-default}` placeholders in the raw content
//! 3. Parse into [`ClientConfig`]
//! 4. Apply `TERN_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! TERN_CONNECTION_STRING="HostName=...;DeviceId=...;SharedAccessKey=..."
//! TERN_TOKEN_VALIDITY_SECS=7200
//! TERN_TOKEN_RENEWAL_MARGIN_SECS=600
//! TERN_OPERATION_TIMEOUT_MS=60000
//! TERN_RECONNECT_TIMEOUT_MS=120000
//! TERN_LOG_LEVEL=debug
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ClientConfig, LogLevel};

/// Looks up an environment variable.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ClientConfig`] from files or strings.
///
/// # Examples
///
/// ```no_run
/// use tern_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("tern.toml").unwrap();
/// println!("policy: {}", config.retry.policy);
/// ```
#[derive(Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
    lookup: EnvLookup,
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("env_prefix", &self.env_prefix)
            .field("resolve_env_vars", &self.resolve_env_vars)
            .finish()
    }
}

impl ConfigLoader {
    /// Creates a loader reading the process environment.
    pub fn new() -> Self {
        Self {
            env_prefix: "TERN".to_string(),
            resolve_env_vars: true,
            lookup: Arc::new(|name| env::var(name).ok()),
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Replaces the environment with a custom lookup.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Loads and validates a configuration file.
    ///
    /// The format is chosen by extension: `.toml`, `.yaml`/`.yml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let format = ConfigFormat::from_path(path)?;
        let content = self.read_file(path)?;
        let config = self.process(&content, format, path)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads and validates configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ClientConfig> {
        self.process(content, format, Path::new("<string>"))
    }

    fn process(&self, content: &str, format: ConfigFormat, path: &Path) -> ConfigResult<ClientConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config = parse_str(&content, format).map_err(|message| ConfigError::parse(path, message))?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        debug!(
            policy = %config.retry.policy,
            validity_secs = config.token.validity_secs,
            margin_secs = config.token.renewal_margin_secs,
            "Configuration validated"
        );
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    /// Resolves `${VAR}` and `${VAR:-default}` placeholders.
    ///
    /// Unknown variables without a default are left in place.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut body = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                body.push(c);
            }

            if !closed {
                result.push_str("${");
                result.push_str(&body);
                continue;
            }

            let (name, default) = match body.find(":-") {
                Some(idx) => (&body[..idx], Some(&body[idx + 2..])),
                None => (body.as_str(), None),
            };

            match ((self.lookup)(name), default) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(default)) => result.push_str(default),
                (None, None) => {
                    warn!("Environment variable '{}' not found", name);
                    result.push_str(&format!("${{{}}}", name));
                }
            }
        }

        result
    }

    fn var(&self, suffix: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, suffix);
        (self.lookup)(&name).map(|value| (name, value))
    }

    fn parsed_var<T: FromStr>(&self, suffix: &str) -> ConfigResult<Option<T>> {
        match self.var(suffix) {
            Some((name, value)) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::invalid_env_var(name, "expected a non-negative integer")),
            None => Ok(None),
        }
    }

    /// Applies `<PREFIX>_*` overrides.
    fn apply_env_overrides(&self, config: &mut ClientConfig) -> ConfigResult<()> {
        if let Some((_, value)) = self.var("CONNECTION_STRING") {
            // The override replaces whatever source the file configured.
            config.connection.connection_string = Some(value);
            config.connection.shared_access_signature = None;
            config.connection.edge_environment = false;
        }

        if let Some(validity) = self.parsed_var::<u64>("TOKEN_VALIDITY_SECS")? {
            config.token.validity_secs = validity;
        }
        if let Some(margin) = self.parsed_var::<u64>("TOKEN_RENEWAL_MARGIN_SECS")? {
            config.token.renewal_margin_secs = margin;
        }

        if let Some(millis) = self.parsed_var::<u64>("OPERATION_TIMEOUT_MS")? {
            config.session.operation_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = self.parsed_var::<u64>("RECONNECT_TIMEOUT_MS")? {
            config.session.reconnect_timeout = Duration::from_millis(millis);
        }

        if let Some((name, value)) = self.var("LOG_LEVEL") {
            match LogLevel::parse(&value) {
                Some(level) => config.logging.level = level,
                None => warn!("Ignoring {}: unknown log level '{}'", name, value),
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_str(content: &str, format: ConfigFormat) -> Result<ClientConfig, String> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => {
            if content.trim().is_empty() {
                return Ok(ClientConfig::default());
            }
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        }
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML format.
    Toml,
    /// YAML format.
    Yaml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads a configuration file with the default loader.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
    ConfigLoader::new().load(path)
}

/// Returns the first existing default configuration path, if any.
pub fn find_config_file() -> Option<PathBuf> {
    ["tern.toml", "tern.yaml", "tern.yml", "tern.json"]
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const KEY_CS: &str = "HostName=hub.example.net;DeviceId=dev-1;SharedAccessKey=a2V5";

    fn loader_with(vars: &[(&str, &str)]) -> ConfigLoader {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigLoader::new().with_env_lookup(move |name| vars.get(name).cloned())
    }

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(
            ".toml",
            &format!(
                r#"
[connection]
connection_string = "{}"

[token]
validity_secs = 1800
renewal_margin_secs = 300

[retry]
policy = "no_retry"

[session]
operation_timeout = 5000

[logging]
level = "debug"
format = "json"
"#,
                KEY_CS
            ),
        );

        let config = loader_with(&[]).load(file.path()).unwrap();
        assert_eq!(config.token.validity_secs, 1800);
        assert_eq!(config.retry.policy, crate::schema::PolicyKind::NoRetry);
        assert_eq!(config.session.operation_timeout, Duration::from_secs(5));
        assert_eq!(config.session.reconnect_timeout, Duration::from_secs(240));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, crate::schema::LogFormat::Json);
    }

    #[test]
    fn test_load_yaml_and_json() {
        let yaml = write_temp(".yaml", &format!("connection:\n  connection_string: \"{}\"\n", KEY_CS));
        let config = loader_with(&[]).load(yaml.path()).unwrap();
        assert_eq!(config.token.validity_secs, 3600);

        let json = write_temp(".json", r#"{"connection": {"edge_environment": true}}"#);
        let config = loader_with(&[]).load(json.path()).unwrap();
        assert!(config.connection.edge_environment);
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("a")).is_err());
    }

    #[test]
    fn test_env_placeholders() {
        let loader = loader_with(&[("DEVICE", "dev-7")]);
        assert_eq!(loader.resolve_env_placeholders("id=${DEVICE}"), "id=dev-7");
        assert_eq!(loader.resolve_env_placeholders("${MISSING:-fallback}"), "fallback");
        assert_eq!(loader.resolve_env_placeholders("${MISSING}"), "${MISSING}");
        assert_eq!(loader.resolve_env_placeholders("cost $5 ${open"), "cost $5 ${open");
    }

    #[test]
    fn test_placeholder_in_file() {
        let file = write_temp(
            ".toml",
            "[connection]\nconnection_string = \"${CS}\"\n",
        );
        let config = loader_with(&[("CS", KEY_CS)]).load(file.path()).unwrap();
        assert_eq!(config.connection.connection_string.as_deref(), Some(KEY_CS));
    }

    #[test]
    fn test_env_overrides() {
        let loader = loader_with(&[
            ("TERN_CONNECTION_STRING", KEY_CS),
            ("TERN_TOKEN_VALIDITY_SECS", "7200"),
            ("TERN_TOKEN_RENEWAL_MARGIN_SECS", "600"),
            ("TERN_OPERATION_TIMEOUT_MS", "1000"),
            ("TERN_RECONNECT_TIMEOUT_MS", "2000"),
            ("TERN_LOG_LEVEL", "warning"),
        ]);

        let config = loader
            .load_from_str("[connection]\nedge_environment = true\n", ConfigFormat::Toml)
            .unwrap();
        assert!(!config.connection.edge_environment);
        assert_eq!(config.connection.connection_string.as_deref(), Some(KEY_CS));
        assert_eq!(config.token.validity_secs, 7200);
        assert_eq!(config.token.renewal_margin_secs, 600);
        assert_eq!(config.session.operation_timeout, Duration::from_millis(1000));
        assert_eq!(config.session.reconnect_timeout, Duration::from_millis(2000));
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_override() {
        let loader = loader_with(&[
            ("TERN_CONNECTION_STRING", KEY_CS),
            ("TERN_TOKEN_VALIDITY_SECS", "soon"),
        ]);
        let err = loader.load_from_str("", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "TERN_TOKEN_VALIDITY_SECS"));
    }

    #[test]
    fn test_overrides_disabled() {
        let loader = loader_with(&[("TERN_CONNECTION_STRING", KEY_CS)]).with_env_vars(false);
        let err = loader.load_from_str("", ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_parse_error_names_path() {
        let file = write_temp(".toml", "[connection\n");
        let err = loader_with(&[]).load(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = loader_with(&[])
            .load_from_str(r#"{"connection": {"edge_environment": true}, "bogus": 1}"#, ConfigFormat::Json)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = loader_with(&[]).load("/nonexistent/tern.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
