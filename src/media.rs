//! Media discovery: which source images are available.
//!
//! ## Rust concepts
//! - `fs::read_dir()` for directory traversal
//! - `Option::is_some_and` for a predicate on an optional value
//! - `serde::Serialize` for automatic JSON conversion

use serde::Serialize;
use std::fs;
use std::path::Path;

/// File extensions the renderer can decode.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Information about a single image file.
#[derive(Serialize, utoipa::ToSchema)]
pub struct MediaEntry {
    /// Filename (e.g., "sunrise.jpg")
    pub name: String,
    /// Relative path from media dir (e.g., "images/sunrise.jpg")
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`].
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
}

/// Scan `<media_dir>/images` for decodable images, sorted by name.
pub fn list_images(media_dir: &Path) -> Vec<MediaEntry> {
    let images_dir = media_dir.join("images");
    let mut entries = Vec::new();

    let read_dir = match fs::read_dir(&images_dir) {
        Ok(rd) => rd,
        Err(_) => return entries,
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let rel_path = format!("images/{name}");

        entries.push(MediaEntry {
            name,
            path: rel_path,
            size,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"fake").unwrap();
    }

    #[test]
    fn list_images_finds_supported_formats() {
        let tmp = TempDir::new().unwrap();
        let images_dir = tmp.path().join("images");
        std::fs::create_dir(&images_dir).unwrap();

        create_file(&images_dir, "sunrise.jpg");
        create_file(&images_dir, "drizzle.jpeg");
        create_file(&images_dir, "snow.png");
        create_file(&images_dir, "anim.gif"); // no decoder compiled in
        create_file(&images_dir, "readme.txt");

        let entries = list_images(tmp.path());
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["drizzle.jpeg", "snow.png", "sunrise.jpg"]);
        assert_eq!(entries[0].path, "images/drizzle.jpeg");
        assert_eq!(entries[0].size, 4);
    }

    #[test]
    fn list_images_returns_empty_when_no_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(list_images(tmp.path()).is_empty());
    }

    #[test]
    fn list_images_skips_directories() {
        let tmp = TempDir::new().unwrap();
        let images_dir = tmp.path().join("images");
        std::fs::create_dir_all(images_dir.join("old.png")).unwrap();
        assert!(list_images(tmp.path()).is_empty());
    }

    #[rstest]
    #[case("a.png", true)]
    #[case("a.JPG", true)]
    #[case("a.jpeg", true)]
    #[case("a.bmp", false)]
    #[case("png", false)]
    fn is_image_by_extension(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_image(Path::new(name)), expected);
    }
}
