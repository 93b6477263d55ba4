//! Egress self-check.
//!
//! Asks an IP-echo service which address the host itself leaves from. The
//! call always connects directly, whatever the proxy rules say.

use serde::Serialize;
use tracing::{info, instrument, warn};
use url::Url;

use crate::context::Context;
use crate::error::Result;
use crate::fetcher::{FetchOptions, Fetcher};

/// Body printed by `streamr health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    Ok { ip: String },
    Error,
}

/// Returns the egress IP reported by `url`. Never cached, never proxied,
/// never forwards client addresses.
#[instrument(skip_all, fields(id = %ctx.id(), url = %url))]
pub async fn check(fetcher: &Fetcher, ctx: &Context, url: &Url) -> Result<String> {
    let options = FetchOptions::new().direct().no_cache().no_proxy_headers();
    let ip = fetcher.text(ctx, url, &options).await?.trim().to_string();
    info!(%ip, "egress check passed");
    Ok(ip)
}

/// [`check`] folded into the status object.
pub async fn status(fetcher: &Fetcher, ctx: &Context, url: &Url) -> HealthStatus {
    match check(fetcher, ctx, url).await {
        Ok(ip) => HealthStatus::Ok { ip },
        Err(e) => {
            warn!(error = %e.chain(), "egress check failed");
            HealthStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_like_the_endpoint() {
        let ok = serde_json::to_string(&HealthStatus::Ok { ip: "203.0.113.7".into() }).unwrap();
        assert_eq!(ok, r#"{"status":"ok","ip":"203.0.113.7"}"#);
        assert_eq!(serde_json::to_string(&HealthStatus::Error).unwrap(), r#"{"status":"error"}"#);
    }
}
