use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::app::{PortageError, Result};
use crate::config::SourceConfig;
use crate::domain::{SourceAuthor, SourceItem};
use crate::source::SourceFeed;

/// Recent-items adapter against the source platform's web API.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    window: u32,
}

#[derive(Deserialize)]
struct ItemListResponse {
    #[serde(rename = "itemList", default)]
    item_list: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawItem {
    id: String,
    #[serde(rename = "createTime")]
    create_time: i64,
    #[serde(default)]
    desc: String,
    #[serde(rename = "isPinnedItem", default)]
    pinned: bool,
    author: RawAuthor,
}

#[derive(Deserialize)]
struct RawAuthor {
    #[serde(rename = "secUid")]
    sec_uid: String,
    #[serde(default)]
    nickname: String,
    #[serde(rename = "uniqueId", default)]
    unique_id: String,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            window: config.window,
        }
    }

    /// Query parameters the source's web client sends alongside every
    /// item-list request.
    fn base_params() -> Vec<(&'static str, &'static str)> {
        vec![
            ("aid", "1988"),
            ("app_language", "en"),
            ("app_name", "tiktok_web"),
            ("browser_language", "en-US"),
            ("browser_name", "Mozilla"),
            ("browser_online", "true"),
            ("browser_platform", "Win32"),
            ("browser_version", "5.0"),
            ("channel", "tiktok_web"),
            ("cookie_enabled", "true"),
            ("device_platform", "web_pc"),
            ("from_page", "user"),
            ("os", "windows"),
            ("region", "US"),
        ]
    }

    fn parse_items(payload: ItemListResponse) -> Vec<SourceItem> {
        let mut items = Vec::with_capacity(payload.item_list.len());
        for value in payload.item_list {
            match serde_json::from_value::<RawItem>(value) {
                Ok(raw) => items.push(SourceItem {
                    id: raw.id,
                    created_at: raw.create_time,
                    description: raw.desc,
                    pinned: raw.pinned,
                    author: SourceAuthor {
                        id: raw.author.sec_uid,
                        nickname: raw.author.nickname,
                        handle: raw.author.unique_id,
                    },
                }),
                Err(e) => {
                    // Malformed entries are skipped, not fatal.
                    debug!("Skipping malformed source item: {}", e);
                }
            }
        }
        items
    }
}

#[async_trait]
impl SourceFeed for HttpSource {
    async fn fetch_recent(&self, producer_id: &str) -> Result<Vec<SourceItem>> {
        let url = format!("{}/api/post/item_list/", self.base_url);
        let window = self.window.to_string();

        let response = self
            .client
            .get(&url)
            .query(&Self::base_params())
            .query(&[
                ("secUid", producer_id),
                ("count", window.as_str()),
                ("cursor", "0"),
            ])
            .send()
            .await?;

        let response = response.error_for_status()?;
        let payload: ItemListResponse = response
            .json()
            .await
            .map_err(|e| PortageError::Source(format!("malformed item list payload: {}", e)))?;

        Ok(Self::parse_items(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_items_maps_fields() {
        let payload: ItemListResponse = serde_json::from_str(
            r#"{
                "itemList": [
                    {
                        "id": "701",
                        "createTime": 150,
                        "desc": "hello",
                        "isPinnedItem": true,
                        "author": {"secUid": "sec-1", "nickname": "N", "uniqueId": "n.n"}
                    }
                ]
            }"#,
        )
        .unwrap();

        let items = HttpSource::parse_items(payload);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "701");
        assert_eq!(items[0].created_at, 150);
        assert!(items[0].pinned);
        assert_eq!(items[0].author.id, "sec-1");
        assert_eq!(items[0].author.handle, "n.n");
    }

    #[test]
    fn test_parse_items_skips_malformed_entries() {
        let payload: ItemListResponse = serde_json::from_str(
            r#"{
                "itemList": [
                    {"id": "701"},
                    {
                        "id": "702",
                        "createTime": 160,
                        "author": {"secUid": "sec-1"}
                    }
                ]
            }"#,
        )
        .unwrap();

        let items = HttpSource::parse_items(payload);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "702");
        assert!(!items[0].pinned);
        assert_eq!(items[0].description, "");
    }

    #[test]
    fn test_empty_payload_is_empty_not_error() {
        let payload: ItemListResponse = serde_json::from_str("{}").unwrap();
        assert!(HttpSource::parse_items(payload).is_empty());
    }
}
