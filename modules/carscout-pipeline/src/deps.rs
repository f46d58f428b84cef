use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use carscout_common::Config;
use carscout_store::Queue;
use telegram_client::{InlineButton, TelegramClient};

use crate::adapters::AdapterRegistry;
use crate::alias::AliasMatcher;
use crate::blob::BlobStore;
use crate::risk::llm::{RiskPrompt, RiskVerdict};

/// Dyn-compatible LLM capability (wraps ai_client's generic extraction).
#[async_trait]
pub trait RiskLlm: Send + Sync {
    async fn evaluate(&self, prompt: &RiskPrompt) -> Result<RiskVerdict>;
}

/// Dyn-compatible messaging capability over the Telegram transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_media_group(
        &self,
        chat: &str,
        image_urls: &[String],
        caption: &str,
        buttons: &[InlineButton],
    ) -> telegram_client::Result<i64>;

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        buttons: &[InlineButton],
    ) -> telegram_client::Result<i64>;

    async fn edit_caption(&self, chat: &str, message_id: i64, caption: &str) -> telegram_client::Result<()>;
}

#[async_trait]
impl Messenger for telegram_client::TelegramClient {
    async fn send_media_group(
        &self,
        chat: &str,
        image_urls: &[String],
        caption: &str,
        buttons: &[InlineButton],
    ) -> telegram_client::Result<i64> {
        TelegramClient::send_media_group(self, chat, image_urls, caption, buttons).await
    }

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        buttons: &[InlineButton],
    ) -> telegram_client::Result<i64> {
        TelegramClient::send_message(self, chat, text, buttons).await
    }

    async fn edit_caption(&self, chat: &str, message_id: i64, caption: &str) -> telegram_client::Result<()> {
        self.edit_message_caption(chat, message_id, caption).await
    }
}

/// Central dependency container passed to every stage and worker.
#[derive(Clone)]
pub struct PipelineDeps {
    pub pool: PgPool,
    pub queue: Queue,
    pub config: Config,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Option<Arc<dyn RiskLlm>>,
    pub messenger: Arc<dyn Messenger>,
    pub adapters: Arc<AdapterRegistry>,
    pub aliases: Arc<tokio::sync::RwLock<AliasMatcher>>,
}

impl PipelineDeps {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reload the alias matcher from the brand_models table. Called at boot
    /// and whenever the alias table changes.
    pub async fn reload_aliases(&self) -> Result<()> {
        let matcher = AliasMatcher::load(&self.pool).await?;
        *self.aliases.write().await = matcher;
        Ok(())
    }
}
