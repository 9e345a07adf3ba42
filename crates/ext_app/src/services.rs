//! Host side of the capability bridge.

use std::sync::Arc;

use async_trait::async_trait;
use ext_bridge::{
    BridgeHandler, FetchResult, OpenedFile, Platform, SaveFileArgs, SaveFileResult, UpdateResult,
};
use ext_fs::FileArbiter;
use ext_net::{FetchedDocument, Fetcher};
use ext_updater::{UpdatePayload, UpdateStore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppError;

/// Requests from bridge handlers to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Re-resolve the active document and reload the window.
    Reload,
}

/// Composes the file arbiter, update store and fetcher behind the bridge.
pub struct HostServices {
    arbiter: FileArbiter,
    store: Arc<UpdateStore>,
    fetcher: Arc<Fetcher>,
    platform: Platform,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl HostServices {
    pub fn new(
        arbiter: FileArbiter,
        store: Arc<UpdateStore>,
        fetcher: Arc<Fetcher>,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            arbiter,
            store,
            fetcher,
            platform: Platform::current(),
            commands,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn arbiter(&self) -> &FileArbiter {
        &self.arbiter
    }

    pub fn store(&self) -> &Arc<UpdateStore> {
        &self.store
    }

    /// Download a replacement UI document and install it.
    pub async fn update_from_url(&self, url: &str) -> Result<FetchedDocument, AppError> {
        let document = self
            .fetcher
            .fetch_text(url)
            .await
            .map_err(|e| AppError::update_failed(e.message()))?;

        self.store
            .apply_update(UpdatePayload::from_url(url, document.body.clone()))
            .await
            .map_err(|e| AppError::update_failed(e.message()))?;

        info!(url = %url, hops = document.hops, "UI document installed from URL");
        Ok(document)
    }
}

#[async_trait]
impl BridgeHandler for HostServices {
    async fn save_file(&self, args: SaveFileArgs) -> SaveFileResult {
        self.arbiter.save(args.into()).into_result()
    }

    async fn open_file(&self) -> Option<OpenedFile> {
        self.arbiter.open().into_wire()
    }

    async fn update_document(&self, html_content: String) -> UpdateResult {
        match self
            .store
            .apply_update(UpdatePayload::direct(html_content))
            .await
        {
            Ok(()) => UpdateResult::applied(),
            Err(e) => UpdateResult::failed(e.message()),
        }
    }

    async fn reload_document(&self) {
        debug!(active = %self.store.resolve_active().path().display(), "reload requested");
        if self.commands.send(SessionCommand::Reload).is_err() {
            warn!("Reload requested after the event loop stopped");
        }
    }

    async fn fetch_url(&self, url: String) -> FetchResult {
        match self.fetcher.fetch_text(&url).await {
            Ok(document) => FetchResult::fetched(document.body),
            Err(e) => {
                warn!(url = %url, error = %e, "fetch-url failed");
                FetchResult::failed(e.message())
            }
        }
    }

    fn platform(&self) -> Platform {
        self.platform
    }
}
