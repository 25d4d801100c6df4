//! Nominatim / OpenStreetMap reverse geocoder client.
//!
//! The public instance allows **1 request per second**; the caller
//! enforces `rate_limit_ms` from the service TOML.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use crate::GeocodeError;

/// Resolves a coordinate to Nominatim's `display_name`.
///
/// Returns `Ok(None)` when Nominatim has no result for the location.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn reverse(
    client: &reqwest::Client,
    base_url: &str,
    lat: f64,
    lon: f64,
    language: Option<&str>,
) -> Result<Option<String>, GeocodeError> {
    let mut request = client.get(base_url).query(&[
        ("lat", lat.to_string()),
        ("lon", lon.to_string()),
        ("format", "jsonv2".to_string()),
    ]);
    if let Some(language) = language {
        request = request.query(&[("accept-language", language)]);
    }

    let resp = request.send().await?;
    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// Parses a Nominatim reverse response.
fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    let object = body.as_object().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an object".to_string(),
    })?;

    if object.contains_key("error") {
        return Ok(None);
    }

    Ok(object
        .get("display_name")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from))
}
