//! Photon reverse geocoder client.
//!
//! Photon answers with a GeoJSON `FeatureCollection`; the address is
//! assembled from the first feature's properties.

use crate::GeocodeError;

/// Resolves a coordinate to a comma-separated address.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn reverse(
    client: &reqwest::Client,
    base_url: &str,
    lat: f64,
    lon: f64,
) -> Result<Option<String>, GeocodeError> {
    let resp = client
        .get(base_url)
        .query(&[("lat", lat.to_string()), ("lon", lon.to_string())])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

fn parse_response(body: &serde_json::Value) -> Result<Option<String>, GeocodeError> {
    let features = body["features"]
        .as_array()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Photon response has no features array".to_string(),
        })?;

    let Some(properties) = features.first().map(|f| &f["properties"]) else {
        return Ok(None);
    };

    let field = |key: &str| {
        properties[key]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let street = match (field("street"), field("housenumber")) {
        (Some(street), Some(number)) => Some(format!("{street} {number}")),
        (Some(street), None) => Some(street.to_string()),
        _ => None,
    };

    let parts: Vec<String> = [
        field("name").map(String::from),
        street,
        field("district").map(String::from),
        field("city").map(String::from),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_address_parts() {
        let body = serde_json::json!({
            "features": [{
                "properties": {
                    "street": "Avenida Providencia",
                    "housenumber": "1208",
                    "district": "Providencia",
                    "city": "Santiago"
                }
            }]
        });
        assert_eq!(
            parse_response(&body).unwrap().as_deref(),
            Some("Avenida Providencia 1208, Providencia, Santiago")
        );
    }

    #[test]
    fn empty_features_is_no_result() {
        let body = serde_json::json!({"features": []});
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn missing_features_is_parse_error() {
        assert!(parse_response(&serde_json::json!({})).is_err());
    }
}
