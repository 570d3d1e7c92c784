//! GDPR queues driven through their redirects against a fake profile API

use anyhow::Result;
use async_trait::async_trait;
use gdprq_core::gdpr::actions::{
    DELETE_PROFILE_DRY_RUN, DELETE_SERVICE_CONNECTION_DRY_RUN, DOWNLOAD_FILE_NAME,
    SELECT_SERVICE_CONNECTION,
};
use gdprq_core::gdpr::{
    build_queue, drive_queue, AuthorizationCodes, GdprContext, ProfileApi, QueueName,
    ServiceConnection,
};
use gdprq_core::models::{Configuration, JsonValue};
use gdprq_core::queue::{MemoryStorage, QueueRunner, RunOutcome, StorageBackend};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Default)]
struct FakeProfileApi {
    calls: Mutex<Vec<String>>,
    /// Services report failure for profile deletion
    refuse_deletion: bool,
}

impl FakeProfileApi {
    fn refusing() -> Self {
        Self {
            refuse_deletion: true,
            ..Self::default()
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn describe(codes: &AuthorizationCodes) -> String {
    codes
        .iter()
        .map(|(argument, code)| format!("{}={}", argument, code))
        .collect::<Vec<_>>()
        .join(",")
}

fn mode(dry_run: bool) -> &'static str {
    if dry_run {
        "dryRun"
    } else {
        "delete"
    }
}

#[async_trait]
impl ProfileApi for FakeProfileApi {
    async fn service_connections(&self) -> Result<Vec<ServiceConnection>> {
        self.record("serviceConnections".to_string());
        Ok(vec![
            ServiceConnection {
                name: "berth".to_string(),
                title: Some("Berths".to_string()),
                gdpr_query_scope: Some("berth.gdprquery".to_string()),
                gdpr_delete_scope: Some("berth.gdprdelete".to_string()),
            },
            ServiceConnection {
                name: "youth".to_string(),
                title: None,
                gdpr_query_scope: Some("youth.gdprquery".to_string()),
                gdpr_delete_scope: Some("youth.gdprdelete".to_string()),
            },
        ])
    }

    async fn download_my_profile(&self, codes: &AuthorizationCodes) -> Result<JsonValue> {
        self.record(format!("download:{}", describe(codes)));
        Ok(json!({ "firstName": "Test", "lastName": "User" }))
    }

    async fn delete_my_profile(
        &self,
        codes: &AuthorizationCodes,
        dry_run: bool,
    ) -> Result<JsonValue> {
        self.record(format!("{}Profile:{}", mode(dry_run), describe(codes)));
        let youth = if self.refuse_deletion {
            json!({ "service": { "name": "youth" }, "success": false, "errors": [{ "code": "SERVICE_BUSY" }] })
        } else {
            json!({ "service": { "name": "youth" }, "success": true, "errors": [] })
        };
        Ok(json!({
            "results": [
                { "service": { "name": "berth" }, "success": true, "errors": [] },
                youth
            ]
        }))
    }

    async fn delete_service_data(
        &self,
        codes: &AuthorizationCodes,
        service_name: &str,
        dry_run: bool,
    ) -> Result<JsonValue> {
        self.record(format!(
            "{}Service:{}:{}",
            mode(dry_run),
            service_name,
            describe(codes)
        ));
        Ok(json!({ "result": { "success": service_name != "youth", "errors": [] } }))
    }
}

fn context(
    download_dir: &Path,
    name: QueueName,
    api: Arc<FakeProfileApi>,
    service_name: Option<&str>,
) -> GdprContext {
    let config = Configuration {
        download_dir: download_dir.to_path_buf(),
        ..Configuration::default()
    };
    let start_page = gdprq_core::gdpr::start_page_url(&config.pages, name).unwrap();
    GdprContext::from_config(
        &config,
        name,
        api,
        Some(start_page),
        service_name.map(str::to_string),
    )
    .unwrap()
}

/// One page load without following any redirect
async fn run_at(
    name: QueueName,
    context: &GdprContext,
    storage: &Arc<dyn StorageBackend>,
) -> RunOutcome {
    let definitions = build_queue(name, context);
    let mut runner =
        QueueRunner::resume_or_start(name.as_str(), definitions, Arc::clone(storage)).unwrap();
    runner.run().await.unwrap()
}

/// One page load, following redirects inside the application
async fn drive(
    name: QueueName,
    context: &GdprContext,
    storage: &Arc<dyn StorageBackend>,
    fresh: bool,
) -> RunOutcome {
    drive_queue(name, context.clone(), Arc::clone(storage), fresh)
        .await
        .unwrap()
}

fn expect_redirect(outcome: RunOutcome) -> Url {
    match outcome {
        RunOutcome::Redirect { url, .. } => url,
        other => panic!("expected redirect, got {:?}", other),
    }
}

fn expect_failure(outcome: RunOutcome) -> (String, String) {
    match outcome {
        RunOutcome::Failed {
            action_type,
            error_message,
        } => (action_type, error_message),
        other => panic!("expected failure, got {:?}", other),
    }
}

fn query_param(url: &Url, name: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

fn callback(code: &str, state: &str) -> Url {
    Url::parse(&format!(
        "http://localhost:3000/gdpr-callback?code={}&state={}",
        code, state
    ))
    .unwrap()
}

/// Start the queue and come back from both logins
async fn sign_in(
    name: QueueName,
    start: &GdprContext,
    storage: &Arc<dyn StorageBackend>,
) -> RunOutcome {
    let first = expect_redirect(drive(name, start, storage, true).await);
    let state = query_param(&first, "state");
    let second = expect_redirect(drive(name, &start.at(callback("code-1", &state)), storage, false).await);
    let state = query_param(&second, "state");
    drive(name, &start.at(callback("code-2", &state)), storage, false).await
}

#[tokio::test]
async fn test_download_profile_through_two_logins() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::DownloadProfile;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    // Start page: stops at the first provider
    let first = expect_redirect(drive(name, &start, &storage, true).await);
    assert!(!start.is_internal(&first));
    assert_eq!(first.host_str(), Some("tunnistamo.dev.hel.ninja"));
    assert_eq!(first.path(), "/authorize");
    assert_eq!(query_param(&first, "scope"), "berth.gdprquery youth.gdprquery");

    // First callback: stops at the second provider
    let state = query_param(&first, "state");
    let second = expect_redirect(
        drive(name, &start.at(callback("code-1", &state)), &storage, false).await,
    );
    assert!(!start.is_internal(&second));
    assert!(second.path().ends_with("/protocol/openid-connect/auth"));
    assert_ne!(query_param(&second, "state"), state);

    // Second callback: follows the start page redirect and finishes
    let state = query_param(&second, "state");
    let outcome = drive(name, &start.at(callback("code-2", &state)), &storage, false).await;

    assert_eq!(outcome.result("authCodeParser:tunnistamo"), Some(&json!("code-1")));
    assert_eq!(outcome.result("authCodeParser:keycloak"), Some(&json!("code-2")));
    assert_eq!(
        outcome.result("startPageCatcher"),
        Some(&json!("http://localhost:3000/download"))
    );
    let path = dir.path().join(DOWNLOAD_FILE_NAME);
    let saved: JsonValue = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["firstName"], "Test");
    assert_eq!(
        api.calls(),
        vec![
            "serviceConnections".to_string(),
            "download:authorizationCode=code-1,authorizationCodeKeycloak=code-2".to_string()
        ]
    );
    assert!(!QueueRunner::should_resume(storage.as_ref(), "downloadProfile"));
}

#[tokio::test]
async fn test_fresh_drive_replaces_stored_run() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::DownloadProfile;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    let first = expect_redirect(drive(name, &start, &storage, true).await);
    let again = expect_redirect(drive(name, &start, &storage, true).await);

    assert_ne!(query_param(&first, "state"), query_param(&again, "state"));
    assert_eq!(api.calls().len(), 2);

    // The first login's state is no longer accepted
    let state = query_param(&first, "state");
    let (action_type, _) = expect_failure(
        drive(name, &start.at(callback("code-1", &state)), &storage, false).await,
    );
    assert_eq!(action_type, "authCodeParser:tunnistamo");
}

#[tokio::test]
async fn test_state_mismatch_fails_queue() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let start = context(dir.path(), QueueName::DeleteProfile, Arc::clone(&api), None);

    let auth_url = expect_redirect(run_at(QueueName::DeleteProfile, &start, &storage).await);
    assert_eq!(query_param(&auth_url, "scope"), "berth.gdprdelete youth.gdprdelete");

    let outcome = run_at(
        QueueName::DeleteProfile,
        &start.at(callback("code-1", "forged")),
        &storage,
    )
    .await;

    let (action_type, error_message) = expect_failure(outcome);
    assert_eq!(action_type, "authCodeParser:tunnistamo");
    assert_eq!(
        error_message,
        "Callback state does not match the requested state"
    );
    assert!(!api.calls().iter().any(|c| c.contains("Profile:")));
}

#[tokio::test]
async fn test_first_callback_is_not_accepted_for_second_login() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::DownloadProfile;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    let first = expect_redirect(drive(name, &start, &storage, true).await);
    let first_callback = callback("code-1", &query_param(&first, "state"));
    expect_redirect(drive(name, &start.at(first_callback.clone()), &storage, false).await);

    // Replaying the first callback reaches the second provider's parser
    let (action_type, _) =
        expect_failure(drive(name, &start.at(first_callback), &storage, false).await);
    assert_eq!(action_type, "authCodeParser:keycloak");
    assert!(!api.calls().iter().any(|c| c.starts_with("download:")));
}

#[tokio::test]
async fn test_unexpected_page_fails_callback_check() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let start = context(dir.path(), QueueName::DownloadProfile, api, None);

    expect_redirect(run_at(QueueName::DownloadProfile, &start, &storage).await);
    let outcome = run_at(QueueName::DownloadProfile, &start, &storage).await;

    let (action_type, _) = expect_failure(outcome);
    assert_eq!(action_type, "authCodeCallbackUrl:tunnistamo");
}

#[tokio::test]
async fn test_delete_profile_runs_dry_run_first() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::DeleteProfile;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    let outcome = sign_in(name, &start, &storage).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    let codes = "authorizationCode=code-1,authorizationCodeKeycloak=code-2";
    assert_eq!(
        api.calls(),
        vec![
            "serviceConnections".to_string(),
            format!("dryRunProfile:{}", codes),
            format!("deleteProfile:{}", codes),
        ]
    );
}

#[tokio::test]
async fn test_failed_dry_run_stops_before_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::refusing());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::DeleteProfile;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    let (action_type, error_message) = expect_failure(sign_in(name, &start, &storage).await);

    assert_eq!(action_type, DELETE_PROFILE_DRY_RUN);
    assert_eq!(error_message, "Deletion failed for services: youth");
    assert!(api.calls().iter().any(|c| c.starts_with("dryRunProfile:")));
    assert!(!api.calls().iter().any(|c| c.starts_with("deleteProfile:")));
    assert!(!QueueRunner::should_resume(storage.as_ref(), "deleteProfile"));
}

#[tokio::test]
async fn test_remove_service_connection() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::RemoveServiceConnection;
    let start = context(dir.path(), name, Arc::clone(&api), Some("berth"));

    let first = expect_redirect(drive(name, &start, &storage, true).await);
    assert_eq!(query_param(&first, "scope"), "berth.gdprdelete");

    let state = query_param(&first, "state");
    let second = expect_redirect(
        drive(name, &start.at(callback("code-1", &state)), &storage, false).await,
    );
    let state = query_param(&second, "state");
    let outcome = drive(name, &start.at(callback("code-2", &state)), &storage, false).await;

    assert_eq!(outcome.result(SELECT_SERVICE_CONNECTION), Some(&json!("berth")));
    let codes = "authorizationCode=code-1,authorizationCodeKeycloak=code-2";
    assert_eq!(
        api.calls()[1..],
        [
            format!("dryRunService:berth:{}", codes),
            format!("deleteService:berth:{}", codes),
        ]
    );
}

#[tokio::test]
async fn test_refused_service_dry_run_stops_removal() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::RemoveServiceConnection;
    let start = context(dir.path(), name, Arc::clone(&api), Some("youth"));

    let (action_type, error_message) = expect_failure(sign_in(name, &start, &storage).await);

    assert_eq!(action_type, DELETE_SERVICE_CONNECTION_DRY_RUN);
    assert_eq!(error_message, "Deleting data from youth failed");
    assert!(!api.calls().iter().any(|c| c.starts_with("deleteService:")));
}

#[tokio::test]
async fn test_remove_service_connection_requires_service() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeProfileApi::default());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let name = QueueName::RemoveServiceConnection;
    let start = context(dir.path(), name, Arc::clone(&api), None);

    let outcome = run_at(name, &start, &storage).await;

    assert_eq!(
        outcome,
        RunOutcome::Failed {
            action_type: SELECT_SERVICE_CONNECTION.to_string(),
            error_message: "No service connection selected".to_string(),
        }
    );
    assert!(api.calls().is_empty());
}
