//! Pinhole-camera geometry for the avalanche footprint.
//!
//! Angles cross this module's boundary in degrees and are converted to
//! radians only for the trigonometric calls. Lengths are unit-agnostic: the
//! footprint comes out in the unit of `distance`.

use crate::error::{LocatorError, Result};
use serde::{Deserialize, Serialize};

/// Smallest |cos(tilt)| accepted before the projection blows up
const MIN_COS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl SensorSize {
    pub const fn new(width_mm: f64, height_mm: f64) -> Self {
        Self {
            width_mm,
            height_mm,
        }
    }
}

/// A planimetric position (LV95 easting/northing, metres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub easting: f64,
    pub northing: f64,
}

/// A position with its terrain elevation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SitedPoint {
    pub easting: f64,
    pub northing: f64,
    pub elevation: f64,
}

/// Terrain or tilt angles in degrees, per axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisAngles {
    pub east: f64,
    pub north: f64,
}

impl AxisAngles {
    pub const ZERO: AxisAngles = AxisAngles {
        east: 0.0,
        north: 0.0,
    };

    /// Tilt of the slope at `target` relative to the slope at `origin`
    pub fn relative_to(self, origin: AxisAngles) -> AxisAngles {
        AxisAngles {
            east: self.east - origin.east,
            north: self.north - origin.north,
        }
    }
}

/// Width and height of the area seen by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub width: f64,
    pub height: f64,
}

impl Footprint {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// How much of the frame the avalanche covers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RelativeSize {
    /// Foreground pixels over total pixels of the segmentation mask
    MaskFraction(f64),
    /// A caller-supplied scalar, used as is
    Scalar(f64),
}

impl RelativeSize {
    pub fn value(self) -> f64 {
        match self {
            RelativeSize::MaskFraction(v) | RelativeSize::Scalar(v) => v,
        }
    }
}

/// Finite-difference slope angles from three elevation samples
///
/// `east` and `north` are sampled `offset` units away from `center`.
pub fn steepness_from_samples(center: f64, east: f64, north: f64, offset: f64) -> Result<AxisAngles> {
    if !(offset.is_finite() && offset > 0.0) {
        return Err(LocatorError::DegenerateGeometry(format!(
            "steepness offset must be positive, got {offset}"
        )));
    }

    Ok(AxisAngles {
        east: ((east - center) / offset).atan().to_degrees(),
        north: ((north - center) / offset).atan().to_degrees(),
    })
}

/// Euclidean distance over (easting, northing, elevation)
pub fn distance_3d(a: &SitedPoint, b: &SitedPoint) -> f64 {
    let de = b.easting - a.easting;
    let dn = b.northing - a.northing;
    let dz = b.elevation - a.elevation;
    (de * de + dn * dn + dz * dz).sqrt()
}

/// Footprint on a plane parallel to the sensor at `distance`
///
/// Similar triangles: `sensor_dimension * distance / focal_length`.
pub fn parallel_size(focal_length_mm: f64, sensor: SensorSize, distance: f64) -> Result<Footprint> {
    if !(focal_length_mm.is_finite() && focal_length_mm > 0.0) {
        return Err(LocatorError::DegenerateGeometry(format!(
            "focal length must be positive, got {focal_length_mm}"
        )));
    }

    let scale = distance / focal_length_mm;
    Ok(Footprint {
        width: sensor.width_mm * scale,
        height: sensor.height_mm * scale,
    })
}

/// Parallel-plane footprint stretched by `1 / cos(tilt)` per axis
pub fn tilted_retro_projection(
    focal_length_mm: f64,
    sensor: SensorSize,
    distance: f64,
    tilt: AxisAngles,
) -> Result<Footprint> {
    let parallel = parallel_size(focal_length_mm, sensor, distance)?;

    let cos_east = tilt.east.to_radians().cos();
    let cos_north = tilt.north.to_radians().cos();
    if cos_east.abs() < MIN_COS || cos_north.abs() < MIN_COS {
        return Err(LocatorError::DegenerateGeometry(format!(
            "tilt ({:.2}, {:.2}) degrees is perpendicular to the sensor",
            tilt.east, tilt.north
        )));
    }

    Ok(Footprint {
        width: parallel.width / cos_east,
        height: parallel.height / cos_north,
    })
}

/// `relative * projected_width * projected_height`
pub fn avalanche_area(relative: RelativeSize, projected: Footprint) -> f64 {
    relative.value() * projected.area()
}
