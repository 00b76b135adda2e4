use exif::{Exif, In, Rational, Tag, Value};
use std::io::Cursor;

/// Camera metadata read from an uploaded photo
///
/// Every field is optional: phones strip GPS, screenshots carry nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    /// WGS84 degrees, south negative
    pub latitude: Option<f64>,
    /// WGS84 degrees, west negative
    pub longitude: Option<f64>,
    pub focal_length_mm: Option<f64>,
    pub make: Option<String>,
    pub model: Option<String>,
}

impl PhotoMetadata {
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Read metadata from encoded image bytes, empty when there is none
pub fn read_metadata(bytes: &[u8]) -> PhotoMetadata {
    let mut cursor = Cursor::new(bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => {
            let metadata = from_exif(&exif);
            tracing::debug!("EXIF metadata: {:?}", metadata);
            metadata
        }
        Err(e) => {
            tracing::debug!("No EXIF metadata: {}", e);
            PhotoMetadata::default()
        }
    }
}

pub fn from_exif(exif: &Exif) -> PhotoMetadata {
    PhotoMetadata {
        latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
        focal_length_mm: rationals(exif, Tag::FocalLength)
            .and_then(|r| r.first().map(Rational::to_f64))
            .filter(|f| f.is_finite() && *f > 0.0),
        make: ascii(exif, Tag::Make),
        model: ascii(exif, Tag::Model),
    }
}

fn rationals(exif: &Exif, tag: Tag) -> Option<&[Rational]> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => Some(values.as_slice()),
        _ => None,
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(values) => {
            let raw = values.first()?;
            let text = String::from_utf8_lossy(raw)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let dms = rationals(exif, value_tag)?;
    let hemisphere = ascii(exif, ref_tag)?;
    dms_to_degrees(dms, &hemisphere)
}

/// Degrees/minutes/seconds to signed decimal degrees
pub fn dms_to_degrees(dms: &[Rational], hemisphere: &str) -> Option<f64> {
    let [d, m, s] = dms else {
        return None;
    };
    let degrees = d.to_f64() + m.to_f64() / 60.0 + s.to_f64() / 3600.0;
    if !degrees.is_finite() {
        return None;
    }

    match hemisphere.trim() {
        "S" | "W" => Some(-degrees),
        _ => Some(degrees),
    }
}
