//! Executors for the GDPR authorization-code queues
//!
//! Actions hand data forward through the queue: each executor reads the
//! results of earlier actions by type and returns its own result as JSON,
//! so a queue restored after a redirect has everything it needs.
//!
//! The four authorization steps run once per provider. Their action types
//! carry the provider name as a suffix (`authCodeParser:keycloak`).

use crate::gdpr::api::{
    check_deletion_results, check_service_deletion, AuthorizationCodes, ProfileApi,
    ServiceConnection,
};
use crate::gdpr::auth_code::{new_state, same_page, AuthCodeFlow};
use crate::models::JsonValue;
use crate::queue::{Action, ActionExecutor, ExecutorOutcome, QueueController};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

pub const SELECT_SERVICE_CONNECTION: &str = "selectServiceConnection";
pub const GET_SERVICE_CONNECTIONS: &str = "getServiceConnections";
pub const GET_GDPR_SCOPES: &str = "getGdprScopes";
pub const AUTH_CODE_REDIRECTION_INITIALIZATION: &str = "authCodeRedirectionInitialization";
pub const AUTH_CODE_REDIRECTION: &str = "authCodeRedirection";
pub const AUTH_CODE_CALLBACK_URL: &str = "authCodeCallbackUrl";
pub const AUTH_CODE_PARSER: &str = "authCodeParser";
pub const REDIRECT_TO_START_PAGE: &str = "redirectToStartPage";
pub const START_PAGE_CATCHER: &str = "startPageCatcher";
pub const GET_DOWNLOAD_DATA: &str = "getDownloadData";
pub const DOWNLOAD_AS_FILE: &str = "downloadAsFile";
pub const DELETE_PROFILE_DRY_RUN: &str = "deleteProfileDryRun";
pub const DELETE_PROFILE: &str = "deleteProfile";
pub const DELETE_SERVICE_CONNECTION_DRY_RUN: &str = "deleteServiceConnectionDryRun";
pub const DELETE_SERVICE_CONNECTION: &str = "deleteServiceConnection";

/// Authorization steps repeated for every provider, in order
pub const AUTH_CODE_STEPS: [&str; 4] = [
    AUTH_CODE_REDIRECTION_INITIALIZATION,
    AUTH_CODE_REDIRECTION,
    AUTH_CODE_CALLBACK_URL,
    AUTH_CODE_PARSER,
];

/// File name of the downloaded profile export
pub const DOWNLOAD_FILE_NAME: &str = "helsinkiprofile_data.json";

/// Result of an earlier action, failing when it has not completed
pub fn required_result(queue: &QueueController, action_type: &str) -> Result<JsonValue> {
    queue
        .get_result(action_type)
        .ok_or_else(|| anyhow!("Result of {} is missing", action_type))
}

fn required_str(queue: &QueueController, action_type: &str, field: Option<&str>) -> Result<String> {
    let result = required_result(queue, action_type)?;
    let value = match field {
        Some(field) => result.get(field).cloned().unwrap_or(JsonValue::Null),
        None => result,
    };

    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Result of {} is not a string", action_type))
}

/// Codes parsed for every provider, keyed by their API argument
pub fn authorization_codes(
    queue: &QueueController,
    providers: &[AuthCodeFlow],
) -> Result<AuthorizationCodes> {
    providers
        .iter()
        .map(|auth| {
            let code = required_str(queue, &auth.action_type(AUTH_CODE_PARSER), None)?;
            Ok((auth.code_argument().to_string(), code))
        })
        .collect()
}

fn current_page(current_url: &Option<Url>) -> Result<&Url> {
    current_url
        .as_ref()
        .ok_or_else(|| anyhow!("Current page URL is unknown"))
}

/// Returns the service chosen for removal
pub struct SelectServiceConnection {
    pub service_name: Option<String>,
}

#[async_trait]
impl ActionExecutor for SelectServiceConnection {
    async fn execute(&self, _action: &Action, _queue: &QueueController) -> Result<ExecutorOutcome> {
        match self.service_name.as_deref() {
            Some(name) if !name.is_empty() => Ok(ExecutorOutcome::resolved(name)),
            _ => bail!("No service connection selected"),
        }
    }
}

pub struct GetServiceConnections {
    pub api: Arc<dyn ProfileApi>,
}

#[async_trait]
impl ActionExecutor for GetServiceConnections {
    async fn execute(&self, _action: &Action, _queue: &QueueController) -> Result<ExecutorOutcome> {
        let connections = self.api.service_connections().await?;
        tracing::debug!(count = connections.len(), "service connections loaded");
        Ok(ExecutorOutcome::Resolved(serde_json::to_value(connections)?))
    }
}

/// Which GDPR scope a workflow needs from each service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Query,
    Delete,
}

/// Collects the GDPR scopes of the relevant services.
///
/// When the queue selected a service, only that service is considered.
pub struct GetGdprScopes {
    pub kind: ScopeKind,
}

#[async_trait]
impl ActionExecutor for GetGdprScopes {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let connections: Vec<ServiceConnection> =
            serde_json::from_value(required_result(queue, GET_SERVICE_CONNECTIONS)?)
                .context("Invalid service connections")?;
        let selected = queue
            .get_result(SELECT_SERVICE_CONNECTION)
            .and_then(|v| v.as_str().map(str::to_string));

        let mut scopes: Vec<String> = Vec::new();
        for connection in &connections {
            if let Some(selected) = &selected {
                if &connection.name != selected {
                    continue;
                }
            }
            let scope = match self.kind {
                ScopeKind::Query => &connection.gdpr_query_scope,
                ScopeKind::Delete => &connection.gdpr_delete_scope,
            };
            if let Some(scope) = scope {
                if !scope.is_empty() && !scopes.contains(scope) {
                    scopes.push(scope.clone());
                }
            }
        }

        if scopes.is_empty() {
            bail!("No GDPR scopes found");
        }
        Ok(ExecutorOutcome::Resolved(json!(scopes)))
    }
}

/// Builds the authorization URL and the state it carries
pub struct AuthCodeRedirectionInitialization {
    pub auth: AuthCodeFlow,
}

#[async_trait]
impl ActionExecutor for AuthCodeRedirectionInitialization {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let scopes: Vec<String> = serde_json::from_value(required_result(queue, GET_GDPR_SCOPES)?)
            .context("Invalid GDPR scopes")?;
        let state = new_state();
        let url = self.auth.authorization_url(&scopes, &state)?;

        Ok(ExecutorOutcome::Resolved(json!({
            "url": url.as_str(),
            "state": state,
        })))
    }
}

pub struct AuthCodeRedirection {
    pub auth: AuthCodeFlow,
}

#[async_trait]
impl ActionExecutor for AuthCodeRedirection {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let initialization = self.auth.action_type(AUTH_CODE_REDIRECTION_INITIALIZATION);
        let url = required_str(queue, &initialization, Some("url"))?;
        let url = Url::parse(&url).with_context(|| format!("Invalid authorization URL {}", url))?;
        Ok(ExecutorOutcome::Redirect(url))
    }
}

/// Accepts the page load only on the configured callback URL
pub struct AuthCodeCallbackUrl {
    pub auth: AuthCodeFlow,
    pub current_url: Option<Url>,
}

#[async_trait]
impl ActionExecutor for AuthCodeCallbackUrl {
    async fn execute(&self, _action: &Action, _queue: &QueueController) -> Result<ExecutorOutcome> {
        let current = current_page(&self.current_url)?;
        if !self.auth.is_callback(current) {
            bail!(
                "Expected callback URL {}, got {}",
                self.auth.redirect_uri(),
                current
            );
        }
        Ok(ExecutorOutcome::resolved(current.as_str()))
    }
}

/// Reads the authorization code from the stored callback URL
pub struct AuthCodeParser {
    pub auth: AuthCodeFlow,
}

#[async_trait]
impl ActionExecutor for AuthCodeParser {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let callback_url = required_str(queue, &self.auth.action_type(AUTH_CODE_CALLBACK_URL), None)?;
        let callback_url = Url::parse(&callback_url)?;
        let expected_state = required_str(
            queue,
            &self.auth.action_type(AUTH_CODE_REDIRECTION_INITIALIZATION),
            Some("state"),
        )?;

        let callback = self.auth.parse_callback(&callback_url)?;
        callback.verify_state(&expected_state)?;
        Ok(ExecutorOutcome::resolved(callback.code))
    }
}

pub struct RedirectToStartPage {
    pub start_page: Url,
}

#[async_trait]
impl ActionExecutor for RedirectToStartPage {
    async fn execute(&self, _action: &Action, _queue: &QueueController) -> Result<ExecutorOutcome> {
        Ok(ExecutorOutcome::Redirect(self.start_page.clone()))
    }
}

/// Accepts the page load only on the workflow's start page
pub struct StartPageCatcher {
    pub start_page: Url,
    pub current_url: Option<Url>,
}

#[async_trait]
impl ActionExecutor for StartPageCatcher {
    async fn execute(&self, _action: &Action, _queue: &QueueController) -> Result<ExecutorOutcome> {
        let current = current_page(&self.current_url)?;
        if !same_page(current, &self.start_page) {
            bail!("Expected start page {}, got {}", self.start_page, current);
        }
        Ok(ExecutorOutcome::resolved(current.as_str()))
    }
}

pub struct GetDownloadData {
    pub api: Arc<dyn ProfileApi>,
    pub providers: Vec<AuthCodeFlow>,
}

#[async_trait]
impl ActionExecutor for GetDownloadData {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let codes = authorization_codes(queue, &self.providers)?;
        let data = self.api.download_my_profile(&codes).await?;
        Ok(ExecutorOutcome::Resolved(data))
    }
}

/// Writes the downloaded data as pretty JSON; the result is the file path
pub struct DownloadAsFile {
    pub download_dir: PathBuf,
}

#[async_trait]
impl ActionExecutor for DownloadAsFile {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let data = required_result(queue, GET_DOWNLOAD_DATA)?;

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.download_dir.display()))?;
        let path = self.download_dir.join(DOWNLOAD_FILE_NAME);
        tokio::fs::write(&path, serde_json::to_string_pretty(&data)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), "profile data saved");
        Ok(ExecutorOutcome::resolved(path.display().to_string()))
    }
}

/// Deletes the profile, or with `dry_run` only asks every service whether
/// it could. Any service reporting failure fails the action.
pub struct DeleteProfile {
    pub api: Arc<dyn ProfileApi>,
    pub providers: Vec<AuthCodeFlow>,
    pub dry_run: bool,
}

#[async_trait]
impl ActionExecutor for DeleteProfile {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let codes = authorization_codes(queue, &self.providers)?;
        let result = self.api.delete_my_profile(&codes, self.dry_run).await?;
        check_deletion_results(&result)?;
        Ok(ExecutorOutcome::Resolved(result))
    }
}

pub struct DeleteServiceConnection {
    pub api: Arc<dyn ProfileApi>,
    pub providers: Vec<AuthCodeFlow>,
    pub dry_run: bool,
}

#[async_trait]
impl ActionExecutor for DeleteServiceConnection {
    async fn execute(&self, _action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        let service_name = required_str(queue, SELECT_SERVICE_CONNECTION, None)?;
        let codes = authorization_codes(queue, &self.providers)?;
        let result = self
            .api
            .delete_service_data(&codes, &service_name, self.dry_run)
            .await?;
        check_service_deletion(&result, &service_name)?;
        Ok(ExecutorOutcome::Resolved(result))
    }
}
