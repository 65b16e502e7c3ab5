//! # archive-proxy
//!
//! An HTTP service that lists and extracts entries of remote archives without
//! downloading them whole.
//!
//! The remote file is read through HTTP Range requests into a fixed-size ring
//! buffer ([`RingBufferReader`]) that behaves like a seekable local file. Format
//! adapters (ZIP, TAR, RAR, 7z, gzip, bzip2, xz) read entries from it, and the
//! [`ArchiveProxy`] dispatcher exposes them over HTTP.
//!
//! ## Features
//!
//! - Listing, single-entry streaming and re-packing of selected entries as ZIP
//! - Concurrent range fetches with ordered reassembly
//! - Format detection from content
//! - Legacy entry-name charsets (GBK, Shift_JIS, ...)
//! - Host allow/deny lists and referrer checks
//!
//! ## Example
//!
//! ```no_run
//! use archive_proxy::{ArchiveProxy, ProxyConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let proxy = ArchiveProxy::new(reqwest::Client::new(), ProxyConfig::default())?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, proxy.router()).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod io;
pub mod server;

pub use archive::{ArchiveAdapter, ArchiveFormat};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRanger, RangeFetcher, ReadAt, ReaderConfig, RingBufferReader};
pub use server::{AccessPolicy, ArchiveProxy, ProxyConfig};
