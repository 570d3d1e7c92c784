//! Named GDPR queues and their action composition

use crate::gdpr::actions::*;
use crate::gdpr::api::ProfileApi;
use crate::gdpr::auth_code::{provider_action_type, AuthCodeFlow};
use crate::models::{Configuration, PageSettings};
use crate::queue::{
    ActionDefinition, ActionExecutor, QueueResult, QueueRunner, RunOutcome, StorageBackend,
};
use crate::services::logging;
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown queue: {0} (expected downloadProfile, deleteProfile or removeServiceConnection)")]
pub struct UnknownQueueName(pub String);

/// The GDPR workflows a queue can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    DownloadProfile,
    DeleteProfile,
    RemoveServiceConnection,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::DownloadProfile,
        QueueName::DeleteProfile,
        QueueName::RemoveServiceConnection,
    ];

    /// Name used as the storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::DownloadProfile => "downloadProfile",
            QueueName::DeleteProfile => "deleteProfile",
            QueueName::RemoveServiceConnection => "removeServiceConnection",
        }
    }

    /// Action types in execution order, with the authorization steps
    /// repeated for each provider name
    pub fn action_types<S: AsRef<str>>(&self, providers: &[S]) -> Vec<String> {
        let (before, after) = self.steps();
        let authorization = providers.iter().flat_map(|provider| {
            AUTH_CODE_STEPS
                .iter()
                .map(move |step| provider_action_type(step, provider.as_ref()))
        });

        before
            .iter()
            .map(|step| step.action_type().to_string())
            .chain(authorization)
            .chain(after.iter().map(|step| step.action_type().to_string()))
            .collect()
    }

    /// Steps before and after the authorization steps
    fn steps(&self) -> (Vec<Step>, Vec<Step>) {
        let mut before = Vec::new();
        if *self == QueueName::RemoveServiceConnection {
            before.push(Step::SelectServiceConnection);
        }
        before.extend([Step::GetServiceConnections, Step::GetGdprScopes]);

        let mut after = vec![Step::RedirectToStartPage, Step::StartPageCatcher];
        match self {
            QueueName::DownloadProfile => {
                after.extend([Step::GetDownloadData, Step::DownloadAsFile])
            }
            QueueName::DeleteProfile => {
                after.extend([Step::DeleteProfileDryRun, Step::DeleteProfile])
            }
            QueueName::RemoveServiceConnection => after.extend([
                Step::DeleteServiceConnectionDryRun,
                Step::DeleteServiceConnection,
            ]),
        }
        (before, after)
    }

    pub fn start_path<'a>(&self, pages: &'a PageSettings) -> &'a str {
        match self {
            QueueName::DownloadProfile => &pages.download_path,
            QueueName::DeleteProfile => &pages.delete_path,
            QueueName::RemoveServiceConnection => &pages.service_connections_path,
        }
    }

    fn scope_kind(&self) -> ScopeKind {
        match self {
            QueueName::DownloadProfile => ScopeKind::Query,
            QueueName::DeleteProfile | QueueName::RemoveServiceConnection => ScopeKind::Delete,
        }
    }
}

/// One position in a queue composition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SelectServiceConnection,
    GetServiceConnections,
    GetGdprScopes,
    RedirectToStartPage,
    StartPageCatcher,
    GetDownloadData,
    DownloadAsFile,
    DeleteProfileDryRun,
    DeleteProfile,
    DeleteServiceConnectionDryRun,
    DeleteServiceConnection,
}

impl Step {
    fn action_type(self) -> &'static str {
        match self {
            Step::SelectServiceConnection => SELECT_SERVICE_CONNECTION,
            Step::GetServiceConnections => GET_SERVICE_CONNECTIONS,
            Step::GetGdprScopes => GET_GDPR_SCOPES,
            Step::RedirectToStartPage => REDIRECT_TO_START_PAGE,
            Step::StartPageCatcher => START_PAGE_CATCHER,
            Step::GetDownloadData => GET_DOWNLOAD_DATA,
            Step::DownloadAsFile => DOWNLOAD_AS_FILE,
            Step::DeleteProfileDryRun => DELETE_PROFILE_DRY_RUN,
            Step::DeleteProfile => DELETE_PROFILE,
            Step::DeleteServiceConnectionDryRun => DELETE_SERVICE_CONNECTION_DRY_RUN,
            Step::DeleteServiceConnection => DELETE_SERVICE_CONNECTION,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = UnknownQueueName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownQueueName(s.to_string()))
    }
}

/// Page the queue returns to after the authorization callback
pub fn start_page_url(pages: &PageSettings, name: QueueName) -> Result<Url> {
    let base = Url::parse(&pages.base_url)
        .with_context(|| format!("Invalid page base URL {}", pages.base_url))?;
    base.join(name.start_path(pages))
        .with_context(|| format!("Invalid start page path for {}", name))
}

/// Everything the executors of one page load need
#[derive(Clone)]
pub struct GdprContext {
    /// URL of the page being loaded; `None` before any navigation
    pub current_url: Option<Url>,
    pub start_page: Url,
    /// Authorization providers, in login order
    pub auth: Vec<AuthCodeFlow>,
    pub api: Arc<dyn ProfileApi>,
    pub download_dir: PathBuf,
    pub service_name: Option<String>,
}

impl GdprContext {
    pub fn from_config(
        config: &Configuration,
        name: QueueName,
        api: Arc<dyn ProfileApi>,
        current_url: Option<Url>,
        service_name: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            current_url,
            start_page: start_page_url(&config.pages, name)?,
            auth: config
                .auth
                .iter()
                .map(AuthCodeFlow::from_settings)
                .collect::<Result<_, _>>()?,
            api,
            download_dir: config.download_dir.clone(),
            service_name,
        })
    }

    /// Same context for the next page load at `url`
    pub fn at(&self, url: Url) -> Self {
        Self {
            current_url: Some(url),
            ..self.clone()
        }
    }

    /// True when `url` belongs to the application itself rather than an
    /// external site such as the authorization server
    pub fn is_internal(&self, url: &Url) -> bool {
        url.origin() == self.start_page.origin()
    }
}

/// Action definitions for `name`, in execution order
pub fn build_queue(name: QueueName, context: &GdprContext) -> Vec<ActionDefinition> {
    let (before, after) = name.steps();
    let step_definition =
        |step: &Step| ActionDefinition::new(step.action_type(), executor_for(*step, name, context));

    before
        .iter()
        .map(step_definition)
        .chain(
            context
                .auth
                .iter()
                .flat_map(|auth| authorization_steps(auth, context)),
        )
        .chain(after.iter().map(step_definition))
        .collect()
}

fn authorization_steps(auth: &AuthCodeFlow, context: &GdprContext) -> Vec<ActionDefinition> {
    let executors: [Arc<dyn ActionExecutor>; 4] = [
        Arc::new(AuthCodeRedirectionInitialization { auth: auth.clone() }),
        Arc::new(AuthCodeRedirection { auth: auth.clone() }),
        Arc::new(AuthCodeCallbackUrl {
            auth: auth.clone(),
            current_url: context.current_url.clone(),
        }),
        Arc::new(AuthCodeParser { auth: auth.clone() }),
    ];

    AUTH_CODE_STEPS
        .iter()
        .zip(executors)
        .map(|(step, executor)| ActionDefinition::new(auth.action_type(step), executor))
        .collect()
}

fn executor_for(step: Step, name: QueueName, context: &GdprContext) -> Arc<dyn ActionExecutor> {
    let api = Arc::clone(&context.api);
    let providers = context.auth.clone();

    match step {
        Step::SelectServiceConnection => Arc::new(SelectServiceConnection {
            service_name: context.service_name.clone(),
        }),
        Step::GetServiceConnections => Arc::new(GetServiceConnections { api }),
        Step::GetGdprScopes => Arc::new(GetGdprScopes {
            kind: name.scope_kind(),
        }),
        Step::RedirectToStartPage => Arc::new(RedirectToStartPage {
            start_page: context.start_page.clone(),
        }),
        Step::StartPageCatcher => Arc::new(StartPageCatcher {
            start_page: context.start_page.clone(),
            current_url: context.current_url.clone(),
        }),
        Step::GetDownloadData => Arc::new(GetDownloadData { api, providers }),
        Step::DownloadAsFile => Arc::new(DownloadAsFile {
            download_dir: context.download_dir.clone(),
        }),
        Step::DeleteProfileDryRun | Step::DeleteProfile => Arc::new(DeleteProfile {
            api,
            providers,
            dry_run: step == Step::DeleteProfileDryRun,
        }),
        Step::DeleteServiceConnectionDryRun | Step::DeleteServiceConnection => {
            Arc::new(DeleteServiceConnection {
                api,
                providers,
                dry_run: step == Step::DeleteServiceConnectionDryRun,
            })
        }
    }
}

/// Run the queue for one page load, following redirects that stay inside
/// the application.
///
/// `fresh` discards any stored run first. Returns on completion, failure,
/// or a redirect to an external site such as an authorization server.
pub async fn drive_queue(
    name: QueueName,
    mut context: GdprContext,
    storage: Arc<dyn StorageBackend>,
    fresh: bool,
) -> QueueResult<RunOutcome> {
    let mut fresh = fresh;

    loop {
        let definitions = build_queue(name, &context);
        let mut runner = if fresh {
            QueueRunner::start_new(name.as_str(), definitions, Arc::clone(&storage))?
        } else {
            QueueRunner::resume_or_start(name.as_str(), definitions, Arc::clone(&storage))?
        };
        fresh = false;

        match runner.run().await? {
            RunOutcome::Redirect { ref url, .. } if context.is_internal(url) => {
                tracing::debug!(queue = %name, url = %url, "following internal redirect");
                logging::log_queue_event("redirect", name.as_str(), Some(url.as_str()));
                context = context.at(url.clone());
            }
            outcome => return Ok(outcome),
        }
    }
}
