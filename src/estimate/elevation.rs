use crate::error::{LocatorError, Result};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::time::Duration;

/// Terrain height lookup
#[async_trait]
pub trait ElevationSource: Send + Sync {
    /// Elevation in metres at an LV95 position
    async fn elevation(&self, easting: f64, northing: f64) -> anyhow::Result<f64>;
}

/// Look up an elevation, reporting any failure as `MissingElevation`
pub async fn lookup(source: &dyn ElevationSource, easting: f64, northing: f64) -> Result<f64> {
    match source.elevation(easting, northing).await {
        Ok(height) if height.is_finite() => Ok(height),
        Ok(height) => Err(LocatorError::MissingElevation {
            easting,
            northing,
            reason: format!("non-finite height {height}"),
        }),
        Err(e) => {
            tracing::warn!("Elevation lookup at ({}, {}) failed: {:#}", easting, northing, e);
            Err(LocatorError::MissingElevation {
                easting,
                northing,
                reason: format!("{e:#}"),
            })
        }
    }
}

/// swisstopo height service (`/rest/services/height`)
pub struct GeoAdminElevation {
    client: reqwest::Client,
    url: String,
    spatial_reference: Option<u32>,
}

impl GeoAdminElevation {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build elevation HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            spatial_reference: Some(2056),
        })
    }
}

/// The service answers `{"height": "1234.5"}`; accept a number too
fn parse_height(body: &serde_json::Value) -> anyhow::Result<f64> {
    match body.get("height") {
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid height {s:?}")),
        Some(serde_json::Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("Invalid height {n}")),
        Some(other) => Err(anyhow!("Unexpected height value {other}")),
        None => Err(anyhow!("Elevation data not found in the response")),
    }
}

#[async_trait]
impl ElevationSource for GeoAdminElevation {
    async fn elevation(&self, easting: f64, northing: f64) -> anyhow::Result<f64> {
        let mut query = vec![
            ("easting", easting.to_string()),
            ("northing", northing.to_string()),
        ];
        if let Some(sr) = self.spatial_reference {
            query.push(("sr", sr.to_string()));
        }

        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .context("Elevation request failed")?
            .error_for_status()
            .context("Elevation service returned an error")?
            .json()
            .await
            .context("Invalid elevation response")?;

        let height = parse_height(&body)?;
        tracing::debug!("Elevation at ({}, {}) = {}", easting, northing, height);
        Ok(height)
    }
}
