//! Profile API used by the GDPR actions

use crate::models::{ApiSettings, JsonValue};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use url::Url;

/// Authorization codes keyed by the API argument each one is sent as
pub type AuthorizationCodes = BTreeMap<String, String>;

const SERVICE_CONNECTIONS_QUERY: &str = r#"
query MyProfileWithServiceConnections {
  myProfile {
    serviceConnections {
      edges {
        node {
          service {
            name
            title
            gdprQueryScope
            gdprDeleteScope
          }
        }
      }
    }
  }
}"#;

const DELETE_MY_PROFILE_MUTATION: &str = r#"
mutation DeleteMyProfile($input: DeleteMyProfileMutationInput!) {
  deleteMyProfile(input: $input) {
    results {
      service {
        name
      }
      success
      errors {
        code
      }
    }
  }
}"#;

const DELETE_SERVICE_DATA_MUTATION: &str = r#"
mutation GdprDeleteMyServiceData($input: DeleteMyServiceDataMutationInput!) {
  deleteMyServiceData(input: $input) {
    result {
      success
      errors {
        code
      }
    }
  }
}"#;

/// A service the profile is connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConnection {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub gdpr_query_scope: Option<String>,
    #[serde(default)]
    pub gdpr_delete_scope: Option<String>,
}

/// Remote operations the GDPR queues depend on
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn service_connections(&self) -> Result<Vec<ServiceConnection>>;

    /// Full profile data, authorized by GDPR query codes
    async fn download_my_profile(&self, codes: &AuthorizationCodes) -> Result<JsonValue>;

    /// Deletion payload with per-service results. With `dry_run` the
    /// services only report whether they could delete.
    async fn delete_my_profile(
        &self,
        codes: &AuthorizationCodes,
        dry_run: bool,
    ) -> Result<JsonValue>;

    async fn delete_service_data(
        &self,
        codes: &AuthorizationCodes,
        service_name: &str,
        dry_run: bool,
    ) -> Result<JsonValue>;
}

/// [`ProfileApi`] over the profile GraphQL endpoint
pub struct GraphqlClient {
    endpoint: Url,
    api_token: Option<String>,
    http: reqwest::Client,
}

impl GraphqlClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let endpoint = Url::parse(&settings.graphql_endpoint)
            .with_context(|| format!("Invalid GraphQL endpoint {}", settings.graphql_endpoint))?;

        Ok(Self {
            endpoint,
            api_token: settings.api_token.clone(),
            http: reqwest::Client::new(),
        })
    }

    async fn request(&self, query: &str, variables: JsonValue) -> Result<JsonValue> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach profile API")?;
        let status = response.status();
        let body: JsonValue = response
            .json()
            .await
            .with_context(|| format!("Invalid response from profile API (HTTP {})", status))?;

        tracing::debug!(status = %status, "profile API responded");
        graphql_data(body)
    }
}

#[async_trait]
impl ProfileApi for GraphqlClient {
    async fn service_connections(&self) -> Result<Vec<ServiceConnection>> {
        let data = self.request(SERVICE_CONNECTIONS_QUERY, json!({})).await?;
        parse_service_connections(&data)
    }

    async fn download_my_profile(&self, codes: &AuthorizationCodes) -> Result<JsonValue> {
        let data = self
            .request(&download_query(codes), code_variables(codes))
            .await?;

        match data.get("downloadMyProfile") {
            Some(JsonValue::Null) | None => bail!("Profile download returned no data"),
            // The API returns the export as a JSON document inside a string
            Some(JsonValue::String(raw)) => {
                Ok(serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.clone())))
            }
            Some(other) => Ok(other.clone()),
        }
    }

    async fn delete_my_profile(
        &self,
        codes: &AuthorizationCodes,
        dry_run: bool,
    ) -> Result<JsonValue> {
        let mut input = code_variables(codes);
        input["dryRun"] = json!(dry_run);
        let data = self
            .request(DELETE_MY_PROFILE_MUTATION, json!({ "input": input }))
            .await?;

        data.get("deleteMyProfile")
            .cloned()
            .ok_or_else(|| anyhow!("Profile deletion returned no data"))
    }

    async fn delete_service_data(
        &self,
        codes: &AuthorizationCodes,
        service_name: &str,
        dry_run: bool,
    ) -> Result<JsonValue> {
        let mut input = code_variables(codes);
        input["serviceName"] = json!(service_name);
        input["dryRun"] = json!(dry_run);
        let data = self
            .request(DELETE_SERVICE_DATA_MUTATION, json!({ "input": input }))
            .await?;

        data.get("deleteMyServiceData")
            .cloned()
            .ok_or_else(|| anyhow!("Service data deletion returned no data"))
    }
}

/// `downloadMyProfile` query taking one argument per authorization code
pub fn download_query(codes: &AuthorizationCodes) -> String {
    let parameters: Vec<String> = codes.keys().map(|k| format!("${}: String!", k)).collect();
    let arguments: Vec<String> = codes.keys().map(|k| format!("{}: ${}", k, k)).collect();
    format!(
        "query DownloadMyProfile({}) {{\n  downloadMyProfile({})\n}}",
        parameters.join(", "),
        arguments.join(", ")
    )
}

fn code_variables(codes: &AuthorizationCodes) -> JsonValue {
    let variables: Map<String, JsonValue> = codes
        .iter()
        .map(|(argument, code)| (argument.clone(), json!(code)))
        .collect();
    JsonValue::Object(variables)
}

/// Extract `data` from a GraphQL response, failing on `errors`
pub fn graphql_data(body: JsonValue) -> Result<JsonValue> {
    if let Some(errors) = body.get("errors").and_then(JsonValue::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .map(|e| e.get("message").and_then(JsonValue::as_str).unwrap_or("unknown error"))
                .collect();
            bail!("{}", messages.join("; "));
        }
    }

    match body.get("data") {
        Some(data) if !data.is_null() => Ok(data.clone()),
        _ => bail!("GraphQL response has no data"),
    }
}

/// Flatten `myProfile.serviceConnections.edges[].node.service`
pub fn parse_service_connections(data: &JsonValue) -> Result<Vec<ServiceConnection>> {
    let edges = data
        .pointer("/myProfile/serviceConnections/edges")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| anyhow!("Profile has no service connections data"))?;

    edges
        .iter()
        .filter_map(|edge| edge.pointer("/node/service"))
        .map(|service| {
            serde_json::from_value(service.clone()).context("Invalid service connection")
        })
        .collect()
}

/// Fail when any service reported an unsuccessful deletion or errors
pub fn check_deletion_results(payload: &JsonValue) -> Result<()> {
    let failed: Vec<&str> = payload
        .get("results")
        .and_then(JsonValue::as_array)
        .map(|results| {
            results
                .iter()
                .filter(|r| !succeeded(r))
                .map(|r| r.pointer("/service/name").and_then(JsonValue::as_str).unwrap_or("unknown"))
                .collect()
        })
        .unwrap_or_default();

    if failed.is_empty() {
        Ok(())
    } else {
        bail!("Deletion failed for services: {}", failed.join(", "))
    }
}

/// Fail unless `deleteMyServiceData` reported success without errors
pub fn check_service_deletion(payload: &JsonValue, service_name: &str) -> Result<()> {
    match payload.get("result") {
        Some(result) if succeeded(result) => Ok(()),
        _ => bail!("Deleting data from {} failed", service_name),
    }
}

fn succeeded(result: &JsonValue) -> bool {
    let no_errors = result
        .get("errors")
        .and_then(JsonValue::as_array)
        .map_or(true, |errors| errors.is_empty());
    result.get("success") == Some(&json!(true)) && no_errors
}
