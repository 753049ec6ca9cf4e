use std::path::{ Path, PathBuf };

use crate::utils::has_ending_insensitive;

pub const WEBCAM_PREFIX: &str = "/dev/video";

const VIDEO_EXTENSIONS: [&str; 9] = [".avi", ".mp4", ".webm", ".flv", ".mjpg", ".mjpeg", ".mkv", ".m4v", ".ts"];
const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".tif", ".bmp", ".jpeg", ".gif"];

/// What an input specifier on the command line refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Webcam(u32),
    Video(PathBuf),
    Image(PathBuf),
    Directory(PathBuf),
    Unsupported(String),
}

/// Classifies an input. The webcam prefix wins, then video and image extensions
/// (case-insensitive, file existence is not checked), then existing directories.
pub fn classify(spec: &str) -> InputKind {
    if spec == "webcam" || spec.starts_with(WEBCAM_PREFIX) {
        InputKind::Webcam(webcam_index(spec))
    } else if is_supported_video(spec) {
        InputKind::Video(PathBuf::from(spec))
    } else if is_supported_image(spec) {
        InputKind::Image(PathBuf::from(spec))
    } else if Path::new(spec).is_dir() {
        InputKind::Directory(PathBuf::from(spec))
    } else {
        InputKind::Unsupported(spec.to_string())
    }
}

/// Leading digits after `/dev/video`, 0 when there are none (`webcam` included).
fn webcam_index(spec: &str) -> u32 {
    let digits: String = spec.strip_prefix(WEBCAM_PREFIX)
        .unwrap_or("")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

pub fn is_supported_video(name: &str) -> bool {
    VIDEO_EXTENSIONS.iter().any(|ext| has_ending_insensitive(name, ext))
}

pub fn is_supported_image(name: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| has_ending_insensitive(name, ext))
}
