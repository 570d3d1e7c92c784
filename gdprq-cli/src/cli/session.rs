//! Configuration, storage and queue driving shared by the queue commands

use anyhow::{anyhow, Context, Result};
use gdprq_core::gdpr::{drive_queue, GdprContext, GraphqlClient, ProfileApi, QueueName};
use gdprq_core::models::Configuration;
use gdprq_core::queue::{FileStorage, RunOutcome, StorageBackend};
use gdprq_core::services::logging;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Explicit `--config` path, or the default location
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Configuration::default_config_path()
            .map_err(|e| anyhow!("Failed to get default config path: {}", e)),
    }
}

/// Parse a queue name given on the command line
pub fn parse_queue_name(queue: &str) -> Result<QueueName> {
    queue
        .parse()
        .map_err(|e| anyhow!("{}. Use 'gdprq queues' to see available queues.", e))
}

/// Loaded configuration plus the storage and API it points at
pub struct Session {
    pub config: Configuration,
    pub storage: Arc<dyn StorageBackend>,
    api: Arc<dyn ProfileApi>,
}

impl Session {
    /// Load and validate configuration, then set up logging and storage
    pub fn load(explicit_config: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path(explicit_config)?;
        let config = Configuration::load_from_file(&config_path)
            .map_err(|e| anyhow!("Failed to load config {}: {}", config_path.display(), e))?;
        if let Err(errors) = config.validate() {
            return Err(anyhow!("Invalid configuration:\n  {}", errors.join("\n  ")));
        }

        // A subscriber may already be installed (e.g. in tests)
        let _ = logging::init_logging(config.log_level);

        let storage = FileStorage::new(&config.storage_dir).with_context(|| {
            format!(
                "Failed to initialize queue storage at {}",
                config.storage_dir.display()
            )
        })?;
        let api = GraphqlClient::new(&config.api).context("Failed to create profile API client")?;

        Ok(Self {
            config,
            storage: Arc::new(storage),
            api: Arc::new(api),
        })
    }

    pub fn context(
        &self,
        name: QueueName,
        current_url: Option<Url>,
        service_name: Option<String>,
    ) -> Result<GdprContext> {
        GdprContext::from_config(
            &self.config,
            name,
            Arc::clone(&self.api),
            current_url,
            service_name,
        )
    }

    /// Run the queue, following redirects that stay inside the application
    pub async fn drive(
        &self,
        name: QueueName,
        context: GdprContext,
        fresh: bool,
    ) -> Result<RunOutcome> {
        Ok(drive_queue(name, context, Arc::clone(&self.storage), fresh).await?)
    }
}
