//! Which address family to dial the droplet on.

use std::net::IpAddr;
use std::time::Duration;

use crate::provider::Droplet;

/// Echoes the caller's address, over IPv6 when the caller has it.
pub const PROBE_URL: &str = "https://api64.ipify.org";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort check whether this host reaches the internet over IPv6.
/// Any failure means "use IPv4".
pub async fn prefers_ipv6() -> bool {
    probe(PROBE_URL).await
}

pub async fn probe(url: &str) -> bool {
    match fetch_own_address(url).await {
        Ok(body) => {
            let v6 = is_ipv6_answer(&body);
            tracing::debug!(answer = %body.trim(), v6, "address family probe");
            v6
        }
        Err(e) => {
            tracing::debug!(error = %e, "address family probe failed, assuming IPv4");
            false
        }
    }
}

async fn fetch_own_address(url: &str) -> Result<String, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()?
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

fn is_ipv6_answer(body: &str) -> bool {
    matches!(body.trim().parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}

/// Public address to dial, falling back to the other family when the
/// preferred one is missing.
pub fn pick_address(droplet: &Droplet, prefer_ipv6: bool) -> Option<IpAddr> {
    droplet
        .public_address(prefer_ipv6)
        .or_else(|| droplet.public_address(!prefer_ipv6))
}
