//! Object key layout and content-type helpers.

use chrono::{DateTime, Datelike, Utc};
use wagate_core::records::Direction;

/// `{session}/{sent|received}/{YYYY}/{MM}/{DD}/{msgID}_{mediaType}{.ext}`
pub fn object_key(
    session_id: &str,
    direction: Direction,
    at: DateTime<Utc>,
    msg_id: &str,
    media_type: &str,
    extension: &str,
) -> String {
    format!(
        "{session_id}/{}/{:04}/{:02}/{:02}/{}_{media_type}{extension}",
        direction.as_str(),
        at.year(),
        at.month(),
        at.day(),
        sanitize_segment(msg_id),
    )
}

/// Object keys must not smuggle path separators in from protocol IDs.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '#' => '_',
            c => c,
        })
        .collect()
}

/// Strip parameters (`audio/ogg; codecs=opus` -> `audio/ogg`) and lowercase.
pub fn base_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or(mime)
        .trim()
        .to_ascii_lowercase()
}

/// File extension (with leading dot) for a MIME type, falling back to the
/// file name's own extension and finally `.bin`.
pub fn extension_for(mime: &str, file_name: Option<&str>) -> String {
    let ext = match base_mime(mime).as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "video/mp4" => ".mp4",
        "video/3gpp" => ".3gp",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "audio/ogg" => ".ogg",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => ".m4a",
        "audio/aac" => ".aac",
        "audio/amr" => ".amr",
        "audio/wav" | "audio/x-wav" => ".wav",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        _ => "",
    };
    if !ext.is_empty() {
        return ext.to_string();
    }
    file_name
        .and_then(extract_extension)
        .unwrap_or_else(|| ".bin".to_string())
}

fn extract_extension(file_name: &str) -> Option<String> {
    let trimmed = file_name.trim();
    let dot = trimmed.rfind('.')?;
    let ext = &trimmed[dot + 1..];
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Best-effort MIME sniffing from magic bytes, for sources without a declared type.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'%', b'P', b'D', b'F', ..] => Some("application/pdf"),
        [b'O', b'g', b'g', b'S', ..] => Some("audio/ogg"),
        [b'I', b'D', b'3', ..] => Some("audio/mpeg"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("video/mp4"),
        _ => None,
    }
}
