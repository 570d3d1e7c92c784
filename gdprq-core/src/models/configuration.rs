//! Configuration data structures

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors raised while reading or writing the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

/// One authorization server the queues collect a GDPR authorization code from.
///
/// Providers run in the order they are listed; each adds its own
/// redirect, callback and parser actions to every queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    /// Provider name, used as the action type suffix
    pub name: String,
    /// OIDC authority base URL
    pub authority: String,
    /// Authorization endpoint relative to the authority
    pub authorization_path: String,
    /// Client id (the profile API audience)
    pub client_id: String,
    /// Callback URL the authorization server redirects back to
    pub redirect_uri: String,
    /// Profile API argument the code is sent as
    pub code_argument: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            name: "tunnistamo".to_string(),
            authority: "https://tunnistamo.dev.hel.ninja/".to_string(),
            authorization_path: "authorize".to_string(),
            client_id: "https://api.hel.fi/auth/helsinkiprofile".to_string(),
            redirect_uri: "http://localhost:3000/gdpr-callback".to_string(),
            code_argument: "authorizationCode".to_string(),
        }
    }
}

impl AuthSettings {
    /// Keycloak login that follows the default provider
    pub fn keycloak() -> Self {
        Self {
            name: "keycloak".to_string(),
            authority:
                "https://tunnistus.test.hel.ninja/auth/realms/helsinki-tunnistus/protocol/openid-connect/"
                    .to_string(),
            authorization_path: "auth".to_string(),
            client_id: "profile-api-test".to_string(),
            code_argument: "authorizationCodeKeycloak".to_string(),
            ..Self::default()
        }
    }

    fn validate(&self, index: usize) -> Vec<String> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("authority", &self.authority),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(format!("auth[{}].{} is not a valid URL: {}", index, field, e));
            }
        }

        if self.client_id.trim().is_empty() {
            errors.push(format!("auth[{}].client_id cannot be empty", index));
        }
        if !is_identifier(&self.name, &['-', '_']) {
            errors.push(format!(
                "auth[{}].name must be letters, digits, '-' or '_'",
                index
            ));
        }
        if !is_identifier(&self.code_argument, &['_'])
            || self.code_argument.starts_with(|c: char| c.is_ascii_digit())
        {
            errors.push(format!(
                "auth[{}].code_argument must be a GraphQL argument name",
                index
            ));
        }

        errors
    }
}

fn is_identifier(value: &str, extra: &[char]) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || extra.contains(&c))
}

/// Profile GraphQL API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiSettings {
    pub graphql_endpoint: String,
    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            graphql_endpoint: "https://helsinki-profile-api-dev.agw.arodevtest.hel.fi/graphql/"
                .to_string(),
            api_token: None,
        }
    }
}

/// Start pages the queues return to after the authorization callback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PageSettings {
    pub base_url: String,
    pub download_path: String,
    pub delete_path: String,
    pub service_connections_path: String,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            download_path: "/download".to_string(),
            delete_path: "/delete".to_string(),
            service_connections_path: "/service-connections".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Configuration {
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// Directory holding persisted queues
    pub storage_dir: PathBuf,
    /// Directory downloaded profile data is written to
    pub download_dir: PathBuf,
    /// Authorization servers, in login order
    pub auth: Vec<AuthSettings>,
    pub api: ApiSettings,
    pub pages: PageSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let download_dir = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            log_level: LogLevel::Info,
            storage_dir: data_dir.join("gdprq").join("queues"),
            download_dir,
            auth: vec![AuthSettings::default(), AuthSettings::keycloak()],
            api: ApiSettings::default(),
            pages: PageSettings::default(),
        }
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Configuration = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("gdprq").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("api.graphql_endpoint", &self.api.graphql_endpoint),
            ("pages.base_url", &self.pages.base_url),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(format!("{} is not a valid URL: {}", field, e));
            }
        }

        if self.auth.is_empty() {
            errors.push("at least one [[auth]] provider is required".to_string());
        }
        let mut names = HashSet::new();
        let mut arguments = HashSet::new();
        for (i, auth) in self.auth.iter().enumerate() {
            errors.extend(auth.validate(i));
            if !names.insert(auth.name.as_str()) {
                errors.push(format!("auth[{}].name '{}' is used twice", i, auth.name));
            }
            if !arguments.insert(auth.code_argument.as_str()) {
                errors.push(format!(
                    "auth[{}].code_argument '{}' is used twice",
                    i, auth.code_argument
                ));
            }
        }

        for (field, value) in [
            ("pages.download_path", &self.pages.download_path),
            ("pages.delete_path", &self.pages.delete_path),
            (
                "pages.service_connections_path",
                &self.pages.service_connections_path,
            ),
        ] {
            if !value.starts_with('/') {
                errors.push(format!("{} must start with '/'", field));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert_eq!(config.log_level, LogLevel::Info);
        let names: Vec<&str> = config.auth.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["tunnistamo", "keycloak"]);
        assert!(config.auth.iter().all(|a| a.redirect_uri.ends_with("/gdpr-callback")));
        assert!(config.storage_dir.ends_with("gdprq/queues"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_validation() {
        let config = Configuration {
            auth: vec![
                AuthSettings {
                    authority: "not a url".to_string(),
                    client_id: " ".to_string(),
                    ..AuthSettings::default()
                },
                AuthSettings {
                    name: "tunnistamo".to_string(),
                    code_argument: "authorization code".to_string(),
                    ..AuthSettings::keycloak()
                },
            ],
            pages: PageSettings {
                download_path: "download".to_string(),
                ..PageSettings::default()
            },
            ..Configuration::default()
        };

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("auth[0].authority")));
        assert!(errors.iter().any(|e| e.contains("auth[0].client_id")));
        assert!(errors.iter().any(|e| e.contains("auth[1].name 'tunnistamo' is used twice")));
        assert!(errors.iter().any(|e| e.contains("auth[1].code_argument must be")));
        assert!(errors.iter().any(|e| e.contains("pages.download_path")));
    }

    #[test]
    fn test_configuration_requires_a_provider() {
        let config = Configuration {
            auth: Vec::new(),
            ..Configuration::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors, vec!["at least one [[auth]] provider is required"]);
    }

    #[test]
    fn test_provider_list_from_file() {
        let config: Configuration = toml::from_str(
            r#"
            [[auth]]
            name = "local"
            authority = "http://localhost:8000/openid/"
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.len(), 1);
        assert_eq!(config.auth[0].name, "local");
        assert_eq!(config.auth[0].code_argument, "authorizationCode");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Configuration = toml::from_str(
            r#"
            log_level = "debug"

            [api]
            graphql_endpoint = "http://localhost:8080/graphql/"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.api.graphql_endpoint, "http://localhost:8080/graphql/");
        assert_eq!(config.pages, PageSettings::default());
        assert_eq!(config.auth.len(), 2);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = Configuration {
            storage_dir: temp_dir.path().join("queues"),
            api: ApiSettings {
                api_token: Some("token".to_string()),
                ..ApiSettings::default()
            },
            ..Configuration::default()
        };

        config.save_to_file(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Configuration::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp_dir = tempdir().unwrap();
        let loaded = Configuration::load_from_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Configuration::default());
    }
}
