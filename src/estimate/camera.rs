use super::geometry::SensorSize;

/// Physical sensor dimensions in millimetres, by marketing name
const SENSORS: &[(&str, (f64, f64))] = &[
    ("Sony Alpha 7 IV", (36.0, 24.0)),
    ("Canon EOS R5", (36.0, 24.0)),
    ("Nikon Z9", (36.0, 24.0)),
    ("Panasonic Lumix S5 II", (36.0, 24.0)),
    ("Fujifilm X-T5", (23.5, 15.6)),
    ("Sony Alpha 6400", (23.5, 15.6)),
    ("Canon EOS R10", (22.3, 14.9)),
    ("Canon EOS M100", (22.3, 14.9)),
    ("Olympus OM-D E-M1 Mark III", (17.3, 13.0)),
    ("Panasonic Lumix GH6", (17.3, 13.0)),
    ("Hasselblad X2D 100C", (44.0, 33.0)),
    ("Fujifilm GFX 100S", (43.8, 32.9)),
    // 1-inch class
    ("Sony Xperia Pro-I", (12.8, 9.6)),
    ("Xiaomi 13 Ultra", (12.8, 9.6)),
    ("Xiaomi 11 Pro", (16.0, 12.0)),
    ("Google Pixel 8 Pro", (9.2, 7.0)),
    ("Samsung Galaxy S23 Ultra", (9.6, 7.2)),
    ("Huawei P60 Pro", (8.8, 6.6)),
    ("Samsung Galaxy A54", (8.9, 6.6)),
    ("Apple iPhone 15 Pro Max", (9.6, 7.2)),
    ("Apple iPhone 15 Pro", (9.6, 7.2)),
    ("Apple iPhone 15", (7.6, 5.7)),
    ("Apple iPhone 14 Pro Max", (9.6, 7.2)),
    ("Apple iPhone 14 Pro", (9.6, 7.2)),
    ("Apple iPhone 14", (7.6, 5.7)),
    ("Apple iPhone 13 Pro Max", (7.6, 5.7)),
    ("Apple iPhone 13 Pro", (7.6, 5.7)),
    ("Apple iPhone 13", (7.6, 5.7)),
    ("Apple iPhone 12 Pro Max", (8.4, 6.3)),
    ("Apple iPhone 12 Pro", (8.4, 6.3)),
    ("Apple iPhone 12", (7.6, 5.7)),
    ("Apple iPhone 11 Pro Max", (7.6, 5.7)),
    ("Apple iPhone 11 Pro", (7.6, 5.7)),
    ("Apple iPhone 11", (6.4, 4.8)),
    ("Apple iPhone XS Max", (7.6, 5.7)),
    ("Apple iPhone XS", (7.6, 5.7)),
    ("Apple iPhone XR", (6.4, 4.8)),
    ("Apple iPhone X", (6.4, 4.8)),
    ("Apple iPhone 8 Plus", (6.4, 4.8)),
    ("Apple iPhone 8", (6.4, 4.8)),
    ("Apple iPhone 7 Plus", (6.4, 4.8)),
    ("Apple iPhone 7", (6.4, 4.8)),
    ("Apple iPhone 6s Plus", (6.4, 4.8)),
    ("Apple iPhone 6s", (6.4, 4.8)),
    ("Apple iPhone 6 Plus", (6.4, 4.8)),
    ("Apple iPhone 6", (6.4, 4.8)),
    ("Apple iPhone SE (2022)", (4.0, 3.0)),
    ("iPhone SE (2022)", (4.0, 3.0)),
    ("DJI Mini 3 Pro (Drone)", (9.6, 7.2)),
    ("GoPro Hero 12 Black", (6.9, 5.2)),
];

/// Sensor size for a camera name (case-insensitive, surrounding spaces ignored)
pub fn sensor_size(name: &str) -> Option<SensorSize> {
    let name = name.trim();
    SENSORS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|&(_, (w, h))| SensorSize::new(w, h))
}

/// Sensor size from EXIF make/model
///
/// Tries the model alone, then `"<make> <model>"`: phones report
/// make "Apple" and model "iPhone 13 Pro".
pub fn sensor_for_exif(make: Option<&str>, model: &str) -> Option<(String, SensorSize)> {
    if let Some(sensor) = sensor_size(model) {
        return Some((model.trim().to_string(), sensor));
    }
    let make = make?.trim();
    let combined = format!("{} {}", make, model.trim());
    sensor_size(&combined).map(|sensor| (combined, sensor))
}
