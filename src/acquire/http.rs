use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::acquire::{AcquireError, Acquired, Acquirer};
use crate::config::{AcquireConfig, SourceConfig};
use crate::domain::PipelineItem;

/// Downloads item media over the source platform's web API: resolve the item
/// id to a direct media URL, then stream the body to the media directory.
pub struct HttpAcquirer {
    client: reqwest::Client,
    base_url: String,
    media_dir: PathBuf,
}

#[derive(Deserialize)]
struct DetailResponse {
    #[serde(rename = "itemInfo")]
    item_info: Option<ItemInfo>,
}

#[derive(Deserialize)]
struct ItemInfo {
    #[serde(rename = "itemStruct")]
    item_struct: Option<ItemStruct>,
}

#[derive(Deserialize)]
struct ItemStruct {
    #[serde(default)]
    desc: String,
    video: Option<VideoMeta>,
}

#[derive(Deserialize)]
struct VideoMeta {
    #[serde(rename = "downloadAddr", default)]
    download_addr: String,
    #[serde(rename = "playAddr", default)]
    play_addr: String,
}

impl HttpAcquirer {
    pub fn new(source: &SourceConfig, acquire: &AcquireConfig, media_dir: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(acquire.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: source.base_url.trim_end_matches('/').to_string(),
            media_dir,
        }
    }

    fn classify_status(status: StatusCode, context: &str) -> AcquireError {
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                AcquireError::NotFound(format!("{}: {}", context, status))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                AcquireError::Transient(format!("{}: {}", context, s))
            }
            s => AcquireError::Permanent(format!("{}: {}", context, s)),
        }
    }

    fn classify_transport(e: reqwest::Error, context: &str) -> AcquireError {
        // Connect/timeout/body errors are worth another attempt.
        if e.is_timeout() || e.is_connect() || e.is_body() || e.is_request() {
            AcquireError::Transient(format!("{}: {}", context, e))
        } else {
            AcquireError::Permanent(format!("{}: {}", context, e))
        }
    }

    /// Resolve the item id to a direct media URL and a display name.
    async fn resolve(&self, item_id: &str) -> Result<(String, String), AcquireError> {
        let url = format!("{}/api/item/detail/", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("itemId", item_id), ("aid", "1988")])
            .send()
            .await
            .map_err(|e| Self::classify_transport(e, "item detail request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "item detail"));
        }

        let detail: DetailResponse = response
            .json()
            .await
            .map_err(|e| AcquireError::Permanent(format!("malformed detail payload: {}", e)))?;

        let item_struct = detail
            .item_info
            .and_then(|info| info.item_struct)
            .ok_or_else(|| AcquireError::NotFound(format!("no detail for item {}", item_id)))?;

        let video = item_struct
            .video
            .ok_or_else(|| AcquireError::NotFound(format!("item {} has no media", item_id)))?;

        let media_url = if !video.download_addr.is_empty() {
            video.download_addr
        } else if !video.play_addr.is_empty() {
            video.play_addr
        } else {
            return Err(AcquireError::NotFound(format!(
                "item {} has no media address",
                item_id
            )));
        };

        Ok((media_url, item_struct.desc))
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    async fn download(&self, item: &PipelineItem) -> Result<Acquired, AcquireError> {
        let (media_url, desc) = self.resolve(&item.item_id).await?;

        let response = self
            .client
            .get(&media_url)
            .send()
            .await
            .map_err(|e| Self::classify_transport(e, "media request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "media download"));
        }

        let path = self.media_dir.join(format!("{}.mp4", item.media_stem()));
        let bytes = write_stream(&path, Box::pin(response.bytes_stream())).await?;

        info!(
            item_id = %item.item_id,
            bytes,
            path = %path.display(),
            "Media downloaded"
        );

        let display_name = if desc.is_empty() {
            item.item_id.clone()
        } else {
            desc
        };

        Ok(Acquired { display_name, path })
    }
}

/// Stream the body to disk chunk by chunk instead of buffering whole videos
/// in memory. A mid-stream failure or an empty body is transient; the partial
/// file is removed on every failure path.
async fn write_stream<S, B, E>(path: &Path, mut stream: S) -> Result<u64, AcquireError>
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AcquireError::Permanent(format!("creating {}: {}", path.display(), e)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return Err(AcquireError::Transient(format!("media body: {}", e)));
            }
        };
        if let Err(e) = file.write_all(chunk.as_ref()).await {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(AcquireError::Permanent(format!(
                "writing {}: {}",
                path.display(),
                e
            )));
        }
        written += chunk.as_ref().len() as u64;
    }

    if written == 0 {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(AcquireError::Transient("empty media body".into()));
    }

    file.flush()
        .await
        .map_err(|e| AcquireError::Permanent(format!("writing {}: {}", path.display(), e)))?;
    Ok(written)
}
