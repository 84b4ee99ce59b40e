use crate::domain::model::{ChainEvent, ChainEventKind, TransactionInfo};
use crate::domain::ports::ChainClient;
use crate::utils::address;
use crate::utils::error::{NoticeError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

#[derive(Debug, Clone)]
pub struct TronGridSettings {
    pub endpoint: String,
    pub contract_address: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub page_size: usize,
    pub max_pages: usize,
    pub only_confirmed: bool,
}

impl TronGridSettings {
    pub fn new(endpoint: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            contract_address: contract_address.into(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            page_size: 200,
            max_pages: 10,
            only_confirmed: true,
        }
    }
}

/// [`ChainClient`] over the TronGrid HTTP API.
pub struct TronGridClient {
    settings: TronGridSettings,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: Option<BlockHeader>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: RawBlockData,
}

#[derive(Debug, Deserialize)]
struct RawBlockData {
    #[serde(default)]
    number: u64,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    data: Vec<RawEvent>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    block_number: u64,
    block_timestamp: i64,
    event_name: String,
    transaction_id: String,
    #[serde(default)]
    result: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionInfo {
    id: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<u64>,
    receipt: Option<RawReceipt>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    result: Option<String>,
}

fn text_field(result: &HashMap<String, serde_json::Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match result.get(*name)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn address_field(
    result: &HashMap<String, serde_json::Value>,
    names: &[&str],
) -> Option<String> {
    let raw = text_field(result, names)?;
    match address::normalize_address(&raw) {
        Ok(addr) => Some(addr),
        Err(e) => {
            tracing::warn!("Skipping malformed address '{}' in event: {}", raw, e);
            None
        }
    }
}

impl RawEvent {
    fn into_chain_event(self) -> Option<ChainEvent> {
        let kind = match self.event_name.as_str() {
            "NoticeServed" | "LegalNoticeCreated" => ChainEventKind::NoticeServed {
                alert_id: text_field(&self.result, &["alertId", "alert_id", "noticeId"])?,
                document_id: text_field(&self.result, &["documentId", "document_id"]),
                server: address_field(&self.result, &["server", "processServer", "serverAddress"])?,
                recipient: address_field(&self.result, &["recipient", "recipientAddress"])?,
            },
            "NoticeAcknowledged" | "NoticeAccepted" => ChainEventKind::NoticeAcknowledged {
                alert_id: text_field(&self.result, &["alertId", "alert_id", "noticeId"])?,
                recipient: address_field(&self.result, &["recipient", "recipientAddress"])?,
            },
            "ServerRegistered" | "ServerAdded" | "ProcessServerRegistered" => {
                ChainEventKind::ServerRegistered {
                    server: address_field(&self.result, &["server", "serverAddress", "account"])?,
                }
            }
            other => ChainEventKind::Other {
                name: other.to_string(),
            },
        };

        Some(ChainEvent {
            transaction_hash: self.transaction_id.to_ascii_lowercase(),
            block_number: self.block_number,
            block_timestamp_ms: self.block_timestamp,
            kind,
        })
    }
}

impl TronGridClient {
    pub fn new(settings: TronGridSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.endpoint.trim_end_matches('/'), path)
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.settings.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn fetch_page(
        &self,
        min_block_timestamp_ms: i64,
        fingerprint: Option<&str>,
    ) -> Result<EventPage> {
        let url = self.url(&format!(
            "/v1/contracts/{}/events",
            self.settings.contract_address
        ));
        let mut query: Vec<(&str, String)> = vec![
            ("min_block_timestamp", min_block_timestamp_ms.to_string()),
            ("order_by", "block_timestamp,asc".to_string()),
            ("limit", self.settings.page_size.to_string()),
        ];
        if self.settings.only_confirmed {
            query.push(("only_confirmed", "true".to_string()));
        }
        if let Some(fp) = fingerprint {
            query.push(("fingerprint", fp.to_string()));
        }

        let response = self
            .with_key(self.client.get(&url).query(&query))
            .send()
            .await?
            .error_for_status()?;
        let page: EventPage = response.json().await?;

        if page.success == Some(false) {
            return Err(NoticeError::ChainError {
                message: page
                    .error
                    .unwrap_or_else(|| "event query reported failure".to_string()),
            });
        }
        Ok(page)
    }
}

#[async_trait]
impl ChainClient for TronGridClient {
    async fn current_block(&self) -> Result<u64> {
        let response = self
            .with_key(self.client.post(self.url("/wallet/getnowblock")))
            .send()
            .await?
            .error_for_status()?;
        let block: NowBlock = response.json().await?;

        block
            .block_header
            .map(|h| h.raw_data.number)
            .ok_or_else(|| NoticeError::ChainError {
                message: "getnowblock returned no block header".to_string(),
            })
    }

    async fn events_since(&self, min_block_timestamp_ms: i64) -> Result<Vec<ChainEvent>> {
        let mut events = Vec::new();
        let mut fingerprint: Option<String> = None;

        for page_index in 0..self.settings.max_pages {
            let page = self
                .fetch_page(min_block_timestamp_ms, fingerprint.as_deref())
                .await?;
            tracing::debug!(
                "Fetched event page {} with {} events",
                page_index + 1,
                page.data.len()
            );

            events.extend(page.data.into_iter().filter_map(RawEvent::into_chain_event));

            fingerprint = page.meta.and_then(|m| m.fingerprint);
            if fingerprint.is_none() {
                break;
            }
        }

        if fingerprint.is_some() {
            tracing::warn!(
                "Event backlog exceeds {} pages; remainder deferred to the next tick",
                self.settings.max_pages
            );
        }

        events.sort_by_key(|e| (e.block_number, e.block_timestamp_ms));
        Ok(events)
    }

    async fn transaction_info(&self, tx_hash: &str) -> Result<Option<TransactionInfo>> {
        let response = self
            .with_key(
                self.client
                    .post(self.url("/wallet/gettransactioninfobyid"))
                    .json(&serde_json::json!({ "value": tx_hash })),
            )
            .send()
            .await?
            .error_for_status()?;
        let info: RawTransactionInfo = response.json().await?;

        // an unknown transaction comes back as `{}`
        let (Some(id), Some(block_number)) = (info.id, info.block_number) else {
            return Ok(None);
        };

        let receipt_result = info.receipt.and_then(|r| r.result);
        let failed_top_level = info.result.as_deref() == Some("FAILED");
        let success = !failed_top_level
            && receipt_result.as_deref().map_or(true, |r| r == "SUCCESS");
        let result = receipt_result
            .or(info.result)
            .unwrap_or_else(|| "SUCCESS".to_string());

        Ok(Some(TransactionInfo {
            tx_hash: id.to_ascii_lowercase(),
            block_number,
            success,
            result,
        }))
    }
}
