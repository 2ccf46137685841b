#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Outbound HTTP transport for object-storage clients
//!
//! This crate builds a pooled hyper client from a flat [`ConnectionConfig`]:
//! - TLS via rustls with a selectable crypto provider and trust policy
//! - Optional hostname verification policy (endpoint, peer or custom)
//! - HTTP proxy routing with `CONNECT` tunnels and Basic proxy credentials
//! - Socket tuning (buffer sizes, `TCP_NODELAY`) and per-socket timeouts
//! - Request admission limits, total and per destination host
//! - Pluggable name resolution
//! - Percent-encoding helpers for object keys and query values
//!
//! Redirects are never followed and nothing is cached: every response,
//! including 3xx, reaches the caller unchanged.
//!
//! # Example
//!
//! ```no_run
//! use objstore_transport::{ConnectionConfig, TransportBuilder};
//! use bytes::Bytes;
//! use http_body_util::Full;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let transport = TransportBuilder::new(ConnectionConfig::default()).build()?;
//!
//! let request = http::Request::get("https://bucket.obs.example.com/object-key")
//!     .body(Full::new(Bytes::new()))?;
//! let response = transport.send(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod dns;
pub mod encoding;
mod error;
pub mod layers;
pub mod proxy;
pub mod socket;
pub mod stream;
pub mod tls;
mod transport;

pub use builder::TransportBuilder;
pub use config::{ConnectionConfig, HttpProtocol, HttpProtocolType, TlsRootConfig};
pub use dispatch::{Admission, DispatchLimits, DispatchPermit, Dispatcher};
pub use dns::{NameResolver, SystemResolver};
pub use encoding::{EncodingMode, encode_url_path, encode_url_string, uri_encode};
pub use error::{BoxError, TlsNotInstalled, TransportError, UnknownHostError};
pub use tls::{HostnameVerifier, KeyManagerFactory, TrustDecision, TrustManagerFactory};
pub use transport::{ResponseBody, TlsState, TransportHandle};
