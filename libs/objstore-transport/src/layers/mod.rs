//! Tower layers of the transport stack
//!
//! - [`DispatchLayer`] - Admits requests through the dispatcher and holds the
//!   slot until the response body is done
//! - [`ProxyAuthLayer`] - Answers a proxy `407` once with Basic credentials

mod dispatch;
mod proxy_auth;

pub use dispatch::{DispatchLayer, DispatchService, PermitBody};
pub use proxy_auth::{ProxyAuthLayer, ProxyAuthService};
