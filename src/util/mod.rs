//! File-system, YAML and image helpers shared by the loaders and the pipeline.

use image::{Rgb, RgbImage};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use yaml_rust::{Yaml, YamlLoader};

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Path does not exist: {0}")]
    MissingPath(PathBuf),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Missing or invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("CSV error: {0}")]
    CsvError(String),
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl From<yaml_rust::ScanError> for UtilError {
    fn from(err: yaml_rust::ScanError) -> Self {
        UtilError::YamlError(err.to_string())
    }
}

impl From<csv::Error> for UtilError {
    fn from(err: csv::Error) -> Self {
        UtilError::CsvError(err.to_string())
    }
}

/// Create `path` (and its parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Remove everything inside `path`, keeping the folder itself.
pub fn clear_folder(path: &Path) -> Result<(), UtilError> {
    if !path.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            fs::remove_dir_all(&entry_path)?;
        } else {
            fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}

/// File names (not paths) of the regular files directly inside `path`, sorted.
pub fn list_files(path: &Path) -> Result<Vec<String>, UtilError> {
    if !path.is_dir() {
        return Err(UtilError::MissingPath(path.to_path_buf()));
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// `true` for `.mp4` / `.MP4` file names.
pub fn is_video_file(name: &str) -> bool {
    name.ends_with(".mp4") || name.ends_with(".MP4")
}

pub fn require_file(path: &Path) -> Result<(), UtilError> {
    if !path.is_file() {
        return Err(UtilError::MissingPath(path.to_path_buf()));
    }
    Ok(())
}

/// Load the first YAML document of a file.
///
/// Files written by OpenCV's `FileStorage` start with a `%YAML:1.0`
/// directive that is not valid YAML 1.2; it is dropped before parsing.
pub fn load_yaml_document(path: &Path) -> Result<Yaml, UtilError> {
    require_file(path)?;
    let contents = fs::read_to_string(path)?;
    parse_yaml_document(&contents)
}

pub fn parse_yaml_document(contents: &str) -> Result<Yaml, UtilError> {
    let cleaned: String = contents
        .lines()
        .filter(|line| !line.trim_start().starts_with("%YAML"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut docs = YamlLoader::load_from_str(&cleaned)?;
    if docs.is_empty() {
        return Err(UtilError::YamlError("Empty YAML document".to_string()));
    }
    Ok(docs.swap_remove(0))
}

fn invalid_field(field: &str, reason: &str) -> UtilError {
    UtilError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn yaml_to_f64(value: &Yaml) -> Option<f64> {
    match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

/// Typed accessors over a YAML mapping node.
pub mod yaml {
    use super::*;

    pub fn is_present(node: &Yaml, key: &str) -> bool {
        !node[key].is_badvalue() && !node[key].is_null()
    }

    pub fn get_str(node: &Yaml, key: &str) -> Result<String, UtilError> {
        node[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| invalid_field(key, "expected a string"))
    }

    pub fn get_f64(node: &Yaml, key: &str) -> Result<f64, UtilError> {
        yaml_to_f64(&node[key]).ok_or_else(|| invalid_field(key, "expected a number"))
    }

    pub fn get_optional_f64(node: &Yaml, key: &str) -> Result<Option<f64>, UtilError> {
        if !is_present(node, key) {
            return Ok(None);
        }
        get_f64(node, key).map(Some)
    }

    pub fn get_u32(node: &Yaml, key: &str) -> Result<u32, UtilError> {
        node[key]
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| invalid_field(key, "expected a non-negative integer"))
    }

    pub fn get_optional_i64(node: &Yaml, key: &str) -> Result<Option<i64>, UtilError> {
        if !is_present(node, key) {
            return Ok(None);
        }
        node[key]
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid_field(key, "expected an integer"))
    }

    pub fn get_f64_vec(node: &Yaml, key: &str) -> Result<Vec<f64>, UtilError> {
        let values = node[key]
            .as_vec()
            .ok_or_else(|| invalid_field(key, "expected a sequence"))?;
        values
            .iter()
            .map(|v| yaml_to_f64(v).ok_or_else(|| invalid_field(key, "expected numbers")))
            .collect()
    }

    pub fn get_seq<'a>(node: &'a Yaml, key: &str) -> Result<&'a [Yaml], UtilError> {
        node[key]
            .as_vec()
            .map(Vec::as_slice)
            .ok_or_else(|| invalid_field(key, "expected a sequence"))
    }
}

/// Serialize `value` with `serde_yaml` and write it to `path`.
pub fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), UtilError> {
    let yaml_string =
        serde_yaml::to_string(value).map_err(|e| UtilError::YamlError(e.to_string()))?;
    fs::write(path, yaml_string)?;
    Ok(())
}

/// Write serializable rows as a CSV file with a header line.
pub fn export_csv<T: Serialize>(rows: &[T], path: &Path) -> Result<(), UtilError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), UtilError> {
    image
        .save(path)
        .map_err(|e| UtilError::ImageError(format!("Failed to save {}: {e}", path.display())))
}

/// Draw an axis-aligned rectangle outline, clipped to the image.
pub fn draw_rectangle(
    image: &mut RgbImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    thickness: u32,
    color: Rgb<u8>,
) {
    if width == 0 || height == 0 {
        return;
    }
    let x_end = x.saturating_add(width);
    let y_end = y.saturating_add(height);
    let (img_w, img_h) = image.dimensions();

    for py in y..y_end.min(img_h) {
        for px in x..x_end.min(img_w) {
            let on_border = px < x + thickness
                || py < y + thickness
                || px + thickness >= x_end
                || py + thickness >= y_end;
            if on_border {
                image.put_pixel(px, py, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_yaml_strips_opencv_directive() {
        let doc = parse_yaml_document("%YAML:1.0\n---\nMaxShift: 3\nName: \"cam\"\n").unwrap();
        assert_eq!(yaml::get_f64(&doc, "MaxShift").unwrap(), 3.0);
        assert_eq!(yaml::get_str(&doc, "Name").unwrap(), "cam");
    }

    #[test]
    fn test_yaml_accessors() {
        let doc = parse_yaml_document("A: 1.5\nB: [1, 2.5, -3.]\nC: 7\nD: text\n").unwrap();
        assert_eq!(yaml::get_f64(&doc, "A").unwrap(), 1.5);
        assert_eq!(yaml::get_f64_vec(&doc, "B").unwrap(), vec![1.0, 2.5, -3.0]);
        assert_eq!(yaml::get_u32(&doc, "C").unwrap(), 7);
        assert_eq!(yaml::get_optional_f64(&doc, "Missing").unwrap(), None);
        assert_eq!(yaml::get_optional_i64(&doc, "C").unwrap(), Some(7));
        assert!(matches!(
            yaml::get_f64(&doc, "D"),
            Err(UtilError::InvalidField { .. })
        ));
        assert!(yaml::get_seq(&doc, "A").is_err());
    }

    #[test]
    fn test_clear_and_list_folder() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.mp4"), b"").unwrap();
        fs::write(dir.path().join("a.MP4"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.MP4", "b.mp4", "notes.txt"]);
        assert_eq!(
            files.iter().filter(|f| is_video_file(f)).count(),
            2
        );

        clear_folder(dir.path()).unwrap();
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_paths() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load_yaml_document(&missing),
            Err(UtilError::MissingPath(_))
        ));
        assert!(list_files(&missing).is_err());
    }

    #[test]
    fn test_draw_rectangle_outline() {
        let mut image = RgbImage::new(10, 10);
        draw_rectangle(&mut image, 2, 2, 6, 6, 1, Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(2, 2), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(7, 5), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(4, 4), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(8, 8), &Rgb([0, 0, 0]));
    }
}
