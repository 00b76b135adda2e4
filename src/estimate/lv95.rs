//! WGS84 to Swiss LV95 (EPSG:2056) using swisstopo's approximate formulas.
//!
//! Accurate to about a metre inside Switzerland, which is well below the
//! resolution of the elevation model it feeds.

use super::geometry::GeoPoint;

pub fn wgs84_to_lv95(latitude: f64, longitude: f64) -> GeoPoint {
    // Auxiliary values in units of 10000"
    let phi = (latitude * 3600.0 - 169_028.66) / 10_000.0;
    let lambda = (longitude * 3600.0 - 26_782.5) / 10_000.0;

    let easting = 2_600_072.37 + 211_455.93 * lambda
        - 10_938.51 * lambda * phi
        - 0.36 * lambda * phi.powi(2)
        - 44.54 * lambda.powi(3);

    let northing = 1_200_147.07 + 308_807.95 * phi + 3_745.25 * lambda.powi(2) + 76.63 * phi.powi(2)
        - 194.56 * lambda.powi(2) * phi
        + 119.79 * phi.powi(3);

    GeoPoint { easting, northing }
}
