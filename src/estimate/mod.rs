pub mod camera;
pub mod elevation;
pub mod exif;
pub mod geometry;
pub mod lv95;

pub use elevation::{ElevationSource, GeoAdminElevation};
pub use geometry::{AxisAngles, Footprint, GeoPoint, RelativeSize, SensorSize, SitedPoint};

use crate::error::{LocatorError, Result};
use self::exif::PhotoMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct EstimatorSettings {
    /// Distance between elevation samples for the slope gradient, metres
    pub steepness_offset: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            steepness_offset: 5.0,
        }
    }
}

/// The camera that took the photo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraSpec {
    pub name: String,
    pub sensor: SensorSize,
    pub focal_length_mm: f64,
}

/// Everything the footprint computation needs, elevations included
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraGeometry {
    pub camera: CameraSpec,
    pub photographer: SitedPoint,
    pub avalanche: SitedPoint,
    /// Avalanche slope minus photographer slope, degrees
    pub tilt: AxisAngles,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizeEstimate {
    /// Photographer to avalanche, metres
    pub distance: f64,
    /// Tilt-corrected frame footprint, metres
    pub projected: Footprint,
    pub tilt: AxisAngles,
    pub relative: RelativeSize,
    /// Avalanche area, square metres
    pub area: f64,
}

/// Elevation at `point` plus its east/north slope angles
pub async fn sample_terrain(
    source: &dyn ElevationSource,
    point: GeoPoint,
    offset: f64,
) -> Result<(SitedPoint, AxisAngles)> {
    let GeoPoint { easting, northing } = point;
    let (center, east, north) = tokio::try_join!(
        elevation::lookup(source, easting, northing),
        elevation::lookup(source, easting + offset, northing),
        elevation::lookup(source, easting, northing + offset),
    )?;

    let angles = geometry::steepness_from_samples(center, east, north, offset)?;
    let sited = SitedPoint {
        easting,
        northing,
        elevation: center,
    };
    Ok((sited, angles))
}

/// Fetch elevations and slopes for both positions
pub async fn resolve_geometry(
    source: &dyn ElevationSource,
    settings: &EstimatorSettings,
    camera: CameraSpec,
    photographer: GeoPoint,
    avalanche: GeoPoint,
) -> Result<CameraGeometry> {
    let offset = settings.steepness_offset;
    let ((photographer, photographer_slope), (avalanche, avalanche_slope)) = tokio::try_join!(
        sample_terrain(source, photographer, offset),
        sample_terrain(source, avalanche, offset),
    )?;

    Ok(CameraGeometry {
        camera,
        photographer,
        avalanche,
        tilt: avalanche_slope.relative_to(photographer_slope),
    })
}

/// Distance, tilt-corrected projection and area; no I/O
pub fn footprint_area(geometry: &CameraGeometry, relative: RelativeSize) -> Result<SizeEstimate> {
    let distance = geometry::distance_3d(&geometry.photographer, &geometry.avalanche);
    let projected = geometry::tilted_retro_projection(
        geometry.camera.focal_length_mm,
        geometry.camera.sensor,
        distance,
        geometry.tilt,
    )?;

    Ok(SizeEstimate {
        distance,
        projected,
        tilt: geometry.tilt,
        relative,
        area: geometry::avalanche_area(relative, projected),
    })
}

/// A fully resolved size-estimation request
#[derive(Debug, Clone, PartialEq)]
pub struct SizeRequest {
    pub camera: CameraSpec,
    pub photographer: GeoPoint,
    pub avalanche: GeoPoint,
    pub relative: RelativeSize,
}

pub async fn estimate_size(
    source: &dyn ElevationSource,
    settings: &EstimatorSettings,
    request: SizeRequest,
) -> Result<SizeEstimate> {
    tracing::debug!(
        "Estimating size for {} from ({:.1}, {:.1}) to ({:.1}, {:.1})",
        request.camera.name,
        request.photographer.easting,
        request.photographer.northing,
        request.avalanche.easting,
        request.avalanche.northing
    );

    let relative = request.relative;
    let geometry = resolve_geometry(
        source,
        settings,
        request.camera,
        request.photographer,
        request.avalanche,
    )
    .await?;

    let estimate = footprint_area(&geometry, relative)?;
    tracing::info!(
        "Estimated area {:.0} m² at {:.0} m (tilt {:.1}°, {:.1}°)",
        estimate.area,
        estimate.distance,
        estimate.tilt.east,
        estimate.tilt.north
    );
    Ok(estimate)
}

/// Size-estimation parameters as sent by a client
///
/// Anything left out falls back to the photo's EXIF metadata or the
/// session's segmentation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SizeQuery {
    pub avalanche: Option<GeoPoint>,
    pub photographer: Option<GeoPoint>,
    pub camera_name: Option<String>,
    pub sensor_mm: Option<SensorSize>,
    pub focal_length_mm: Option<f64>,
    pub relative_size: Option<f64>,
}

impl SizeQuery {
    pub fn resolve(self, metadata: &PhotoMetadata, mask_fraction: Option<f64>) -> Result<SizeRequest> {
        let avalanche = self
            .avalanche
            .ok_or(LocatorError::MissingMetadata("avalanche position"))?;

        let photographer = match self.photographer {
            Some(point) => point,
            None => {
                let (lat, lon) = metadata
                    .position()
                    .ok_or(LocatorError::MissingMetadata("photographer position"))?;
                lv95::wgs84_to_lv95(lat, lon)
            }
        };

        let focal_length_mm = self
            .focal_length_mm
            .or(metadata.focal_length_mm)
            .ok_or(LocatorError::MissingMetadata("focal length"))?;

        let camera = resolve_camera(self.camera_name, self.sensor_mm, metadata, focal_length_mm)?;

        let relative = match (self.relative_size, mask_fraction) {
            (Some(scalar), _) => RelativeSize::Scalar(scalar),
            (None, Some(fraction)) => RelativeSize::MaskFraction(fraction),
            (None, None) => return Err(LocatorError::MissingMetadata("segmentation mask")),
        };

        Ok(SizeRequest {
            camera,
            photographer,
            avalanche,
            relative,
        })
    }
}

fn resolve_camera(
    name: Option<String>,
    sensor: Option<SensorSize>,
    metadata: &PhotoMetadata,
    focal_length_mm: f64,
) -> Result<CameraSpec> {
    let (name, sensor) = match (name, sensor) {
        (name, Some(sensor)) => (name.unwrap_or_else(|| "custom".to_string()), sensor),
        (Some(name), None) => {
            let sensor = camera::sensor_size(&name).ok_or_else(|| LocatorError::UnknownCamera(name.clone()))?;
            (name, sensor)
        }
        (None, None) => {
            let model = metadata
                .model
                .as_deref()
                .ok_or(LocatorError::MissingMetadata("camera model"))?;
            camera::sensor_for_exif(metadata.make.as_deref(), model).ok_or_else(|| {
                let full = match &metadata.make {
                    Some(make) => format!("{make} {model}"),
                    None => model.to_string(),
                };
                LocatorError::UnknownCamera(full)
            })?
        }
    };

    Ok(CameraSpec {
        name,
        sensor,
        focal_length_mm,
    })
}
