//! Deterministic storage paths and content-type mapping for uploads.
//!
//! Output objects are keyed `{owner_id}/{YYYY-MM-DD}/{generation_id}.{ext}`
//! so paths never collide and partition naturally by owner and day.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::types::DbId;

/// Fallback content type when the extension is unknown.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Cache-control header applied to uploaded generation output.
pub const OUTPUT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Build the storage path for a generation's output object.
pub fn build_storage_path(
    owner_id: DbId,
    generation_id: DbId,
    uploaded_at: DateTime<Utc>,
    extension: &str,
) -> Result<String, CoreError> {
    let ext = normalize_extension(extension)?;
    let day = uploaded_at.format("%Y-%m-%d");
    Ok(format!("{owner_id}/{day}/{generation_id}.{ext}"))
}

/// Map a file extension to its MIME content type.
///
/// Unknown extensions fall back to [`FALLBACK_CONTENT_TYPE`].
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Validate and normalize an extension: strip a leading dot, lowercase,
/// and reject empty or path-unsafe values.
fn normalize_extension(extension: &str) -> Result<String, CoreError> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        return Err(CoreError::Validation(
            "Output extension must not be empty".into(),
        ));
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CoreError::Validation(format!(
            "Output extension '{extension}' contains invalid characters"
        )));
    }
    Ok(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 27, 12, 30, 0).unwrap()
    }

    #[test]
    fn path_partitions_by_owner_and_day() {
        let path = build_storage_path(42, 1001, fixed_date(), "png").unwrap();
        assert_eq!(path, "42/2026-08-27/1001.png");
    }

    #[test]
    fn leading_dot_and_case_are_normalized() {
        let path = build_storage_path(1, 2, fixed_date(), ".MP4").unwrap();
        assert_eq!(path, "1/2026-08-27/2.mp4");
    }

    #[test]
    fn empty_extension_rejected() {
        assert!(build_storage_path(1, 2, fixed_date(), "").is_err());
        assert!(build_storage_path(1, 2, fixed_date(), ".").is_err());
    }

    #[test]
    fn path_traversal_extension_rejected() {
        assert!(build_storage_path(1, 2, fixed_date(), "png/../../etc").is_err());
    }

    #[test]
    fn known_content_types() {
        assert_eq!(content_type_for_extension("png"), "image/png");
        assert_eq!(content_type_for_extension(".JPEG"), "image/jpeg");
        assert_eq!(content_type_for_extension("mp4"), "video/mp4");
        assert_eq!(content_type_for_extension("wav"), "audio/wav");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(content_type_for_extension("xyz"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn same_generation_same_day_is_collision_free_across_owners() {
        let a = build_storage_path(1, 7, fixed_date(), "png").unwrap();
        let b = build_storage_path(2, 7, fixed_date(), "png").unwrap();
        assert_ne!(a, b);
    }
}
