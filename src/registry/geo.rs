//! Country lookup used to scope mirror discovery

use super::client::{FetchOptions, ProbeClient};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

pub const IPAPI_CO_URL: &str = "https://ipapi.co/json";
pub const IP_API_COM_URL: &str = "http://ip-api.com/json";

/// Fewer mirrors than this in the host's country widens discovery
pub const MIN_COUNTRY_MIRRORS: usize = 3;

#[derive(Debug, Deserialize)]
struct IpapiCoResponse {
    country_name: String,
}

#[derive(Debug, Deserialize)]
struct IpApiComResponse {
    country: String,
}

/// English name of the country the host appears to be in, `None` when both
/// lookup services fail
pub async fn locate_country(client: &ProbeClient) -> Option<String> {
    let primary = lookup::<IpapiCoResponse>(client, IPAPI_CO_URL, Duration::from_secs(2))
        .await
        .map(|response| response.country_name);
    let (country, url) = match primary {
        Some(country) => (country, IPAPI_CO_URL),
        None => {
            let country = lookup::<IpApiComResponse>(client, IP_API_COM_URL, Duration::from_secs(5))
                .await
                .map(|response| response.country)?;
            (country, IP_API_COM_URL)
        }
    };
    let country = country.trim().to_string();
    if country.is_empty() {
        return None;
    }
    info!("Found your location: {} by {}", country, url);
    Some(country)
}

async fn lookup<T>(client: &ProbeClient, url: &str, timeout: Duration) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let options = FetchOptions {
        timeout,
        ..FetchOptions::default()
    };
    let body = match client.fetch(url, options).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to determine location using {} ({})", url, e);
            return None;
        }
    };
    match serde_json::from_slice(&body) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Unexpected response from {} ({})", url, e);
            None
        }
    }
}
