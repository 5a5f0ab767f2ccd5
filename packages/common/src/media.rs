use serde::{Deserialize, Serialize};

/// How the pipeline treats an upload, decided from its declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    /// `video/*`: stored, then transcoded before it becomes downloadable.
    Video,
    /// Everything else: downloadable as soon as it is stored.
    Other,
}

impl MediaClass {
    pub fn classify(mime_type: &str) -> Self {
        if essence(mime_type).starts_with("video/") {
            Self::Video
        } else {
            Self::Other
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// Lowercased MIME type without parameters (`video/MP4; codecs=x` -> `video/mp4`).
pub fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether `mime_type` appears in the allow-list (compared by essence).
pub fn is_allowed(mime_type: &str, allowed: &[String]) -> bool {
    let essence = essence(mime_type);
    allowed.iter().any(|a| a.eq_ignore_ascii_case(&essence))
}

/// Number of leading bytes [`sniff_matches`] needs to decide.
pub const SNIFF_LEN: usize = TS_PACKET_LEN + 1;

const TS_PACKET_LEN: usize = 188;
const TS_SYNC: u8 = 0x47;

/// Check the leading bytes of an upload against the signature of its declared
/// type.
///
/// Types without a known signature are accepted.
pub fn sniff_matches(mime_type: &str, head: &[u8]) -> bool {
    match essence(mime_type).as_str() {
        "image/jpeg" => head.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        "image/gif" => head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a"),
        // ISO base media: a size-prefixed `ftyp` box.
        "video/mp4" | "video/quicktime" => head.len() >= 8 && &head[4..8] == b"ftyp",
        // EBML header shared by WebM and Matroska.
        "video/webm" | "video/x-matroska" => head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        // Program stream pack/sequence header, or transport stream sync bytes
        // opening two consecutive packets. One `0x47` alone is just a 'G'.
        "video/mpeg" => {
            head.starts_with(&[0x00, 0x00, 0x01, 0xBA])
                || head.starts_with(&[0x00, 0x00, 0x01, 0xB3])
                || (head.first() == Some(&TS_SYNC) && head.get(TS_PACKET_LEN) == Some(&TS_SYNC))
        }
        _ => true,
    }
}

/// Extension to store the original under: the upload's own extension if it
/// has one, else the first extension registered for the MIME type.
pub fn extension_for(filename: &str, mime_type: &str) -> Option<String> {
    let from_name = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    from_name.or_else(|| {
        mime_guess::get_mime_extensions_str(&essence(mime_type))
            .and_then(|exts| exts.first())
            .map(|e| e.to_string())
    })
}
