//! Weather condition → source image.
//!
//! Fetching the forecast is someone else's job; this only maps the
//! condition they report (OpenWeatherMap-style names like `Clear` or
//! `Thunderstorm`) to an image in the media directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Image shown for any condition without its own entry.
pub const FALLBACK_IMAGE: &str = "sunrise.jpg";

const DEFAULT_TABLE: &[(&str, &str)] = &[
    ("clear", "sunrise.jpg"),
    ("rain", "rain.jpg"),
    ("snow", "snow.jpg"),
    ("thunderstorm", "thunderstorm.jpg"),
    ("drizzle", "drizzle.jpeg"),
    ("clouds", "clouds.jpeg"),
];

#[derive(Clone, Debug)]
pub struct WeatherImages {
    images_dir: PathBuf,
    table: BTreeMap<String, String>,
    fallback: String,
}

impl WeatherImages {
    /// The stock table, resolving file names inside `images_dir`.
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        let table = DEFAULT_TABLE
            .iter()
            .map(|&(condition, file)| (condition.to_string(), file.to_string()))
            .collect();
        Self {
            images_dir: images_dir.into(),
            table,
            fallback: FALLBACK_IMAGE.to_string(),
        }
    }

    /// Add or replace the image for one condition.
    pub fn with_entry(mut self, condition: &str, file: &str) -> Self {
        self.table
            .insert(condition.trim().to_ascii_lowercase(), file.to_string());
        self
    }

    /// Path of the image for `condition`. Matching ignores case and
    /// surrounding whitespace; unknown conditions get the fallback image.
    pub fn select_image(&self, condition: &str) -> PathBuf {
        let key = condition.trim().to_ascii_lowercase();
        let file = self.table.get(&key).unwrap_or(&self.fallback);
        self.images_dir.join(file)
    }
}
