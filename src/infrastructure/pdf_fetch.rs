//! Streaming PDF download
//!
//! Documents arrive in bounded-size chunks and are written straight into a
//! spooled temp file, so memory use is O(1) relative to document size. The
//! PDF signature is validated from the first bytes; retries (driven by the
//! engine's retry policy) restart the download from scratch; a partial
//! spool is never resumed.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::SpooledTempFile;
use tracing::debug;

use crate::domain::entities::{DocumentStream, ListingRow};
use crate::domain::errors::ScrapeError;
use crate::domain::services::DocumentFetcher;
use crate::infrastructure::session::SessionManager;

/// Spool bytes kept in memory before spilling to disk.
const SPOOL_MEMORY_LIMIT: usize = 2 * 1024 * 1024;

const PDF_MAGIC: &[u8] = b"%PDF-";

pub struct PdfFetcher {
    session: Arc<SessionManager>,
    download_timeout: Duration,
}

impl PdfFetcher {
    pub fn new(session: Arc<SessionManager>, download_timeout: Duration) -> Self {
        Self {
            session,
            download_timeout,
        }
    }
}

#[async_trait]
impl DocumentFetcher for PdfFetcher {
    async fn fetch(&self, row: &ListingRow) -> Result<DocumentStream, ScrapeError> {
        let url = &row.pdf_url;
        let response = self
            .session
            .get_with_timeout(url, Some(self.download_timeout))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Fetch {
                url: url.clone(),
                message: format!("document endpoint answered {status}"),
            });
        }

        // An HTML answer here is a rendered error or login page, not a
        // document; fail fast before streaming anything.
        if let Some(content_type) = header_str(&response, reqwest::header::CONTENT_TYPE) {
            if content_type.starts_with("text/html") {
                return Err(ScrapeError::InvalidDocument {
                    url: url.clone(),
                    reason: format!("unexpected content type {content_type}"),
                });
            }
        }

        let file_name = infer_file_name(
            header_str(&response, reqwest::header::CONTENT_DISPOSITION).as_deref(),
            url,
        );

        let mut spool = SpooledTempFile::new(SPOOL_MEMORY_LIMIT);
        let mut magic = Vec::with_capacity(PDF_MAGIC.len());
        let mut total: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ScrapeError::Fetch {
                url: url.clone(),
                message: format!("stream interrupted: {e}"),
            })?;

            // The signature can straddle chunk boundaries on tiny chunks.
            if magic.len() < PDF_MAGIC.len() {
                magic.extend(chunk.iter().take(PDF_MAGIC.len() - magic.len()));
                if magic.len() == PDF_MAGIC.len() && !has_pdf_signature(&magic) {
                    return Err(ScrapeError::InvalidDocument {
                        url: url.clone(),
                        reason: "missing PDF signature".to_string(),
                    });
                }
            }

            spool.write_all(&chunk).map_err(|e| ScrapeError::Fetch {
                url: url.clone(),
                message: format!("spool write failed: {e}"),
            })?;
            total += chunk.len() as u64;
        }

        if magic.len() < PDF_MAGIC.len() {
            return Err(ScrapeError::InvalidDocument {
                url: url.clone(),
                reason: format!("document truncated at {total} bytes"),
            });
        }

        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| ScrapeError::Fetch {
                url: url.clone(),
                message: format!("spool rewind failed: {e}"),
            })?;

        debug!("Downloaded {} ({} bytes) as {}", url, total, file_name);
        Ok(DocumentStream::new(spool, file_name, total))
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Check the first bytes of a download against the PDF signature.
pub(crate) fn has_pdf_signature(head: &[u8]) -> bool {
    head.starts_with(PDF_MAGIC)
}

/// File name from the Content-Disposition header when present, otherwise
/// the last URL path segment (with a `.pdf` suffix ensured).
pub(crate) fn infer_file_name(content_disposition: Option<&str>, url: &str) -> String {
    if let Some(name) = content_disposition.and_then(disposition_file_name) {
        return name;
    }

    let basename = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("judgment");
    // Strip any query string the portal appends to download links.
    let basename = basename.split('?').next().unwrap_or(basename);

    if basename.to_ascii_lowercase().ends_with(".pdf") {
        basename.to_string()
    } else {
        format!("{basename}.pdf")
    }
}

/// File name from a Content-Disposition header. The extended RFC 5987
/// `filename*=` parameter takes precedence over plain `filename=`
/// (RFC 6266 §4.3); its value is percent-decoded after the charset prefix.
fn disposition_file_name(header: &str) -> Option<String> {
    let mut plain = None;
    for parameter in header.split(';') {
        let parameter = parameter.trim();
        if let Some(value) = strip_param(parameter, "filename*=") {
            let encoded = value.rsplit("''").next().unwrap_or(value);
            if let Ok(decoded) = percent_encoding::percent_decode_str(encoded).decode_utf8() {
                let decoded = decoded.trim();
                if !decoded.is_empty() {
                    return Some(decoded.to_string());
                }
            }
        } else if let Some(value) = strip_param(parameter, "filename=") {
            if !value.is_empty() {
                plain = Some(value.to_string());
            }
        }
    }
    plain
}

fn strip_param<'a>(parameter: &'a str, prefix: &str) -> Option<&'a str> {
    parameter
        .strip_prefix(prefix)
        .map(|raw| raw.trim().trim_matches(['"', '\'']).trim())
}
