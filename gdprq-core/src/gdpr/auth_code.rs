//! Authorization-code flow helpers
//!
//! Only the two things the queues need from the authorization server are
//! modelled here: building the URL the browser is sent to, and reading the
//! code (or error) from the callback URL it comes back with.

use crate::models::AuthSettings;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Errors raised while building or parsing authorization-code URLs
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthCodeError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No scopes to authorize")]
    NoScopes,

    #[error("Authorization failed: {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },

    #[error("Callback URL has no authorization code")]
    MissingCode,

    #[error("Callback state does not match the requested state")]
    StateMismatch,
}

/// Code and state read from a callback URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCodeCallback {
    pub code: String,
    pub state: Option<String>,
}

impl AuthCodeCallback {
    /// Check the returned state against the one sent with the request
    pub fn verify_state(&self, expected: &str) -> Result<(), AuthCodeError> {
        match &self.state {
            Some(state) if state == expected => Ok(()),
            _ => Err(AuthCodeError::StateMismatch),
        }
    }
}

/// Client side of an authorization-code exchange with one named provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCodeFlow {
    name: String,
    authorization_endpoint: Url,
    client_id: String,
    redirect_uri: Url,
    code_argument: String,
}

impl AuthCodeFlow {
    /// Provider whose authorization endpoint is `{authority}/authorize`
    pub fn new(
        name: &str,
        authority: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<Self, AuthCodeError> {
        Self::with_endpoint(name, authority, "authorize", client_id, redirect_uri)
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthCodeError> {
        let flow = Self::with_endpoint(
            &settings.name,
            &settings.authority,
            &settings.authorization_path,
            &settings.client_id,
            &settings.redirect_uri,
        )?;
        Ok(flow.with_code_argument(&settings.code_argument))
    }

    fn with_endpoint(
        name: &str,
        authority: &str,
        authorization_path: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<Self, AuthCodeError> {
        let mut authority = parse_url(authority)?;
        if !authority.path().ends_with('/') {
            let path = format!("{}/", authority.path());
            authority.set_path(&path);
        }
        let authorization_endpoint =
            authority
                .join(authorization_path)
                .map_err(|e| AuthCodeError::InvalidUrl {
                    url: authority.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self {
            name: name.to_string(),
            authorization_endpoint,
            client_id: client_id.to_string(),
            redirect_uri: parse_url(redirect_uri)?,
            code_argument: "authorizationCode".to_string(),
        })
    }

    /// Profile API argument this provider's code is sent as
    pub fn with_code_argument(mut self, argument: &str) -> Self {
        self.code_argument = argument.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code_argument(&self) -> &str {
        &self.code_argument
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Queue action type of `step` for this provider, e.g.
    /// `authCodeParser:keycloak`
    pub fn action_type(&self, step: &str) -> String {
        provider_action_type(step, &self.name)
    }

    /// URL of the authorization endpoint requesting `scopes`
    pub fn authorization_url(&self, scopes: &[String], state: &str) -> Result<Url, AuthCodeError> {
        if scopes.is_empty() {
            return Err(AuthCodeError::NoScopes);
        }

        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);

        Ok(url)
    }

    /// True when `url` is the configured callback page
    pub fn is_callback(&self, url: &Url) -> bool {
        same_page(url, &self.redirect_uri)
    }

    /// Read the authorization code from a callback URL
    pub fn parse_callback(&self, url: &Url) -> Result<AuthCodeCallback, AuthCodeError> {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = None;

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(AuthCodeError::Denied { error, description });
        }

        match code {
            Some(code) if !code.is_empty() => Ok(AuthCodeCallback { code, state }),
            _ => Err(AuthCodeError::MissingCode),
        }
    }
}

/// Action type of an authorization step run against provider `provider`
pub fn provider_action_type(step: &str, provider: &str) -> String {
    format!("{}:{}", step, provider)
}

/// Fresh opaque value for the `state` parameter
pub fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Same origin and path, ignoring query, fragment and a trailing slash
pub fn same_page(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin() && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

fn parse_url(value: &str) -> Result<Url, AuthCodeError> {
    Url::parse(value).map_err(|e| AuthCodeError::InvalidUrl {
        url: value.to_string(),
        reason: e.to_string(),
    })
}
