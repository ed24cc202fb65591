//! `ContentSource` over the Audiobookshelf playback API

use crate::http::{check_status, transport_error, AbsHttpClient};
use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    ContentSource, DownloadStream, PlayableBook,
};
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};

/// Formats the core can hand to the engine.
const SUPPORTED_MIME_TYPES: &[&str] = &["audio/flac", "audio/mpeg", "audio/mp4"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayRequest<'a> {
    device_info: DeviceInfo<'a>,
    supported_mime_types: &'a [&'a str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfo<'a> {
    client_version: &'a str,
}

impl AbsHttpClient {
    fn play_request(&self) -> PlayRequest<'_> {
        PlayRequest {
            device_info: DeviceInfo {
                client_version: &self.client_version,
            },
            supported_mime_types: SUPPORTED_MIME_TYPES,
        }
    }
}

#[async_trait]
impl ContentSource for AbsHttpClient {
    /// Opens a playback session (`POST api/items/{id}/play`).
    #[instrument(skip(self))]
    async fn fetch_playable_book(&self, item_id: &str) -> Result<PlayableBook> {
        let url = self.endpoint(&format!("api/items/{}/play", item_id));
        let response = self
            .authorized(self.client.post(url))?
            .json(&self.play_request())
            .send()
            .await
            .map_err(transport_error)?;

        let book: PlayableBook = check_status(response).await?.json().await.map_err(|e| {
            BridgeError::OperationFailed(format!("Invalid playback session for {}: {}", item_id, e))
        })?;

        debug!(
            session_id = %book.id,
            tracks = book.audio_tracks.len(),
            chapters = book.chapters.len(),
            "Playback session opened"
        );
        Ok(book)
    }

    async fn download_stream(&self, url: &str) -> Result<DownloadStream> {
        let response = self
            .authorized(self.client.get(self.endpoint(url)))?
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(stream);

        Ok(DownloadStream::new(Box::new(reader), content_length))
    }
}
