//! In-memory fakes for the capability interfaces, used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use carscout_common::RiskLevel;
use telegram_client::InlineButton;

use crate::adapters::{AdapterResult, RecordPage, SourceAdapter, SourceRecord};
use crate::blob::BlobStore;
use crate::deps::{Messenger, RiskLlm};
use crate::risk::llm::{RiskPrompt, RiskVerdict};

/// Blob store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no blob {key}"))
    }
}

/// Messenger that records sends and hands out sequential message ids.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<SentRecord>>,
    pub fail_with: Mutex<Option<fn() -> telegram_client::TransportError>>,
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub chat: String,
    pub kind: &'static str,
    pub text: String,
    pub message_id: i64,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_media_group(
        &self,
        chat: &str,
        _image_urls: &[String],
        caption: &str,
        _buttons: &[InlineButton],
    ) -> telegram_client::Result<i64> {
        if let Some(make_error) = *self.fail_with.lock().unwrap() {
            return Err(make_error());
        }
        let mut sent = self.sent.lock().unwrap();
        let message_id = sent.len() as i64 + 1;
        sent.push(SentRecord {
            chat: chat.to_string(),
            kind: "media_group",
            text: caption.to_string(),
            message_id,
        });
        Ok(message_id)
    }

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        _buttons: &[InlineButton],
    ) -> telegram_client::Result<i64> {
        if let Some(make_error) = *self.fail_with.lock().unwrap() {
            return Err(make_error());
        }
        let mut sent = self.sent.lock().unwrap();
        let message_id = sent.len() as i64 + 1;
        sent.push(SentRecord {
            chat: chat.to_string(),
            kind: "message",
            text: text.to_string(),
            message_id,
        });
        Ok(message_id)
    }

    async fn edit_caption(
        &self,
        chat: &str,
        message_id: i64,
        caption: &str,
    ) -> telegram_client::Result<()> {
        if let Some(make_error) = *self.fail_with.lock().unwrap() {
            return Err(make_error());
        }
        self.sent.lock().unwrap().push(SentRecord {
            chat: chat.to_string(),
            kind: "edit",
            text: caption.to_string(),
            message_id,
        });
        Ok(())
    }
}

/// LLM stub with a fixed verdict, or failure when `verdict` is None.
pub struct StubRiskLlm {
    pub verdict: Option<RiskVerdict>,
}

impl StubRiskLlm {
    pub fn green(confidence: f64) -> Self {
        Self {
            verdict: Some(RiskVerdict {
                risk_level: RiskLevel::Green,
                confidence,
                reasons: vec!["няма индикации за проблеми".to_string()],
                summary: "Обявата изглежда редовна.".to_string(),
                buyer_notes: String::new(),
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self { verdict: None }
    }
}

#[async_trait]
impl RiskLlm for StubRiskLlm {
    async fn evaluate(&self, _prompt: &RiskPrompt) -> Result<RiskVerdict> {
        self.verdict
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm unavailable"))
    }
}

/// Adapter that serves a fixed batch of records, one page.
pub struct FixtureAdapter {
    pub source_name: String,
    pub records: Vec<SourceRecord>,
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    async fn list_recent(&self, _cursor: Option<&str>) -> AdapterResult<RecordPage> {
        Ok(RecordPage { records: self.records.clone(), next_cursor: None })
    }

    async fn fetch_detail(&self, url: &str) -> AdapterResult<Vec<u8>> {
        self.records
            .iter()
            .find(|r| r.url == url)
            .map(|r| r.raw_blob.clone())
            .ok_or_else(|| carscout_common::CarScoutError::Scrape(format!("no record for {url}")))
    }

    fn name(&self) -> &str {
        &self.source_name
    }
}
