//! Supabase upsert sink
//!
//! Writes records through the PostgREST API with upsert-by-key semantics:
//! `on_conflict=external_id` plus `resolution=merge-duplicates` makes
//! re-runs overwrite instead of duplicate, which is what makes the
//! pipeline's at-least-once delivery safe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::debug;

use crate::domain::entities::JudgmentRecord;
use crate::domain::errors::ScrapeError;
use crate::domain::services::RecordSink;

pub struct SupabaseSink {
    client: reqwest::Client,
    endpoint: String,
}

impl SupabaseSink {
    pub fn new(supabase_url: &str, service_key: &str, table_name: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {service_key}"))
            .context("service key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let mut apikey =
            HeaderValue::from_str(service_key).context("service key is not a valid header value")?;
        apikey.set_sensitive(true);
        headers.insert("apikey", apikey);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create Supabase client")?;

        Ok(Self {
            client,
            endpoint: rest_endpoint(supabase_url, table_name),
        })
    }
}

#[async_trait]
impl RecordSink for SupabaseSink {
    async fn upsert(&self, record: &JudgmentRecord) -> Result<(), ScrapeError> {
        let upsert_err = |message: String| ScrapeError::Upsert {
            external_id: record.external_id.clone(),
            message,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("on_conflict", "external_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record])
            .send()
            .await
            .map_err(|e| upsert_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upsert_err(format!("{status}: {body}")));
        }

        debug!("Upserted record '{}'", record.external_id);
        Ok(())
    }
}

/// PostgREST endpoint for a table.
fn rest_endpoint(supabase_url: &str, table_name: &str) -> String {
    format!(
        "{}/rest/v1/{}",
        supabase_url.trim_end_matches('/'),
        table_name
    )
}
