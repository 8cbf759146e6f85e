//! Target URL safety checks, applied before any request leaves the box.
//!
//! Tracked URLs come from user input, so the fetcher refuses anything that
//! is not plain http(s) to a routable public host. Literal loopback,
//! private, and link-local addresses are rejected here; hostnames that
//! resolve to such addresses are caught by the fetcher's DNS check.

use std::net::IpAddr;

use url::{Host, Url};

use crate::error::ScrapeError;

/// Parses and vets a target URL. `allow_private` opens up loopback and
/// private ranges for test environments.
///
/// # Errors
///
/// Returns [`ScrapeError::InvalidUrl`] for malformed URLs or unsupported
/// schemes, and [`ScrapeError::UnroutableAddress`] when the host is a
/// non-public address literal.
pub fn validate_target_url(raw: &str, allow_private: bool) -> Result<Url, ScrapeError> {
    let url = Url::parse(raw).map_err(|e| ScrapeError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScrapeError::InvalidUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }

    match url.host() {
        None => {
            return Err(ScrapeError::InvalidUrl {
                url: raw.to_owned(),
                reason: "missing host".to_owned(),
            });
        }
        Some(Host::Domain(domain)) => {
            if !allow_private && domain.eq_ignore_ascii_case("localhost") {
                return Err(ScrapeError::UnroutableAddress {
                    url: raw.to_owned(),
                    host: domain.to_owned(),
                });
            }
        }
        Some(Host::Ipv4(addr)) => {
            if !allow_private && !is_public_ip(IpAddr::V4(addr)) {
                return Err(ScrapeError::UnroutableAddress {
                    url: raw.to_owned(),
                    host: addr.to_string(),
                });
            }
        }
        Some(Host::Ipv6(addr)) => {
            if !allow_private && !is_public_ip(IpAddr::V6(addr)) {
                return Err(ScrapeError::UnroutableAddress {
                    url: raw.to_owned(),
                    host: addr.to_string(),
                });
            }
        }
    }

    Ok(url)
}

/// Whether an address is routable on the public internet.
#[must_use]
pub fn is_public_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10, carrier-grade NAT.
                || (v4.octets()[0] == 100 && v4.octets()[1] & 0xc0 == 0x40))
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_ip(IpAddr::V4(mapped));
            }
            !(v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7, unique local.
                || v6.segments()[0] & 0xfe00 == 0xfc00
                // fe80::/10, link local.
                || v6.segments()[0] & 0xffc0 == 0xfe80)
        }
    }
}
