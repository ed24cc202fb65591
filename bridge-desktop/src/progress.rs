//! `ProgressSink` posting local session snapshots

use crate::http::{check_status, transport_error, AbsHttpClient};
use async_trait::async_trait;
use bridge_traits::{error::Result, ProgressSink, ProgressUpdate};
use serde::Serialize;
use tracing::debug;

/// Body of `POST api/session/local`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalSession<'a> {
    id: &'a str,
    library_item_id: &'a str,
    current_time: f64,
    time_listening: f64,
    duration: f64,
    updated_at: i64,
}

impl<'a> From<&'a ProgressUpdate> for LocalSession<'a> {
    fn from(update: &'a ProgressUpdate) -> Self {
        Self {
            id: &update.session_id,
            library_item_id: &update.library_item_id,
            current_time: update.current_time,
            time_listening: update.time_listening,
            duration: update.duration,
            updated_at: update.updated_at,
        }
    }
}

#[async_trait]
impl ProgressSink for AbsHttpClient {
    async fn report(&self, update: ProgressUpdate) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.endpoint("api/session/local")))?
            .json(&LocalSession::from(&update))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;

        debug!(
            session_id = %update.session_id,
            current_time = update.current_time,
            "Session synced"
        );
        Ok(())
    }
}
