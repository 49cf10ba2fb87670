//! Infrastructure module - Portal, PDF and storage implementations
//!
//! Concrete implementations of the domain trait seams: the authenticated
//! HTTP transport, listing page extraction, streaming PDF fetch and parse,
//! and the Supabase sink, plus configuration, logging and the shared retry
//! policy.

pub mod config;
pub mod http_client;
pub mod listing;
pub mod logging;
pub mod otp;
pub mod pdf_fetch;
pub mod pdf_parse;
pub mod retry;
pub mod session;
pub mod supabase;

pub use config::{PortalSelectors, Settings};
pub use http_client::{HttpClient, HttpClientConfig};
pub use listing::ListingClient;
pub use otp::CredentialResolver;
pub use pdf_fetch::PdfFetcher;
pub use pdf_parse::JudgmentParser;
pub use retry::RetryPolicy;
pub use session::SessionManager;
pub use supabase::SupabaseSink;
