//! Helpers shared by the `attache` binary.

use std::path::Path;

use attache_core::models::{file_extension, JobCategory, JobStatus};
use serde::Serialize;
use uuid::Uuid;

/// Room used for files submitted from the command line.
pub const CLI_ROOM: &str = "cli";

/// Best-effort MIME type from a filename, as an upload endpoint would report it.
pub fn guess_mime_type(filename: &str) -> &'static str {
    match file_extension(filename).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("pdf") => "application/pdf",
        Some("stl") => "model/stl",
        Some("obj") => "model/obj",
        _ => "application/octet-stream",
    }
}

/// Locator an uploaded original is staged under.
pub fn upload_key(room_id: &str, filename: &str) -> String {
    let name: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("uploads/{}/{}-{}", room_id, Uuid::new_v4(), name)
}

/// Display name of a path, falling back to the whole path.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .unwrap_or_else(|| path.display().to_string())
}

/// One line of the final report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file: String,
    pub category: JobCategory,
    pub message_id: String,
    pub status: Option<JobStatus>,
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_mime_type_known_extensions() {
        assert_eq!(guess_mime_type("a.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("clip.mp4"), "video/mp4");
        assert_eq!(guess_mime_type("part.stl"), "model/stl");
    }

    #[test]
    fn guess_mime_type_falls_back() {
        assert_eq!(guess_mime_type("bracket.dxd"), "application/octet-stream");
        assert_eq!(guess_mime_type("README"), "application/octet-stream");
    }

    #[test]
    fn guessed_types_detect_expected_category() {
        for (name, category) in [
            ("a.png", JobCategory::Image),
            ("a.ogg", JobCategory::Audio),
            ("a.pdf", JobCategory::Document),
            ("a.ply", JobCategory::Model3d),
        ] {
            assert_eq!(JobCategory::detect(guess_mime_type(name), name), category);
        }
    }

    #[test]
    fn upload_key_is_scoped_to_room() {
        let key = upload_key("room-7", "dir/part.stl");
        assert!(key.starts_with("uploads/room-7/"));
        assert!(key.ends_with("-dir_part.stl"));
        assert_ne!(key, upload_key("room-7", "dir/part.stl"));
    }

    #[test]
    fn file_name_uses_last_component() {
        assert_eq!(file_name(Path::new("/tmp/scans/teapot.obj")), "teapot.obj");
    }
}
