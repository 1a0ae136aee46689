//! Destination key derivation and format policy.

/// Sequence marker the engine injects into output filenames.
pub const SEQUENCE_MARKER: &str = "_00001_";

/// Extensions treated as lossless raster formats.
const LOSSLESS_EXTENSIONS: &[&str] = &["png"];

/// Lower-cased extension of the last path segment, if any.
pub fn extension(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

fn is_lossless(name: &str) -> bool {
    extension(name).is_some_and(|ext| LOSSLESS_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether an artifact must be converted to a lossy format before being
/// stored under `key`: the source is lossless and the key is not.
pub fn needs_transcode(artifact_name: &str, key: &str) -> bool {
    is_lossless(artifact_name) && !is_lossless(key)
}

/// Treat `key` as a folder: drop the extension of its last segment.
///
/// `folder/out.jpg` becomes `folder/out`; `folder/out` stays as is.
pub fn folder_prefix(key: &str) -> &str {
    let key = key.trim_end_matches('/');
    let segment_start = key.rfind('/').map_or(0, |i| i + 1);
    match key[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => &key[..segment_start + dot],
        _ => key,
    }
}

/// Drop the engine's sequence marker so names do not depend on its counters.
///
/// `x_00001_1.png` becomes `x_1.png`.
pub fn normalize_name(name: &str) -> String {
    name.replace(SEQUENCE_MARKER, "_")
}

/// Destination key of one artifact in a multi-artifact upload.
pub fn multi_file_key(key: &str, artifact_name: &str) -> String {
    format!("{}/{}", folder_prefix(key), normalize_name(artifact_name))
}

/// Replace the extension of `name` (or append one).
pub fn with_extension(name: &str, ext: &str) -> String {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{ext}", &name[..segment_start + dot]),
        _ => format!("{name}.{ext}"),
    }
}

/// MIME type sent with an upload.
pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
