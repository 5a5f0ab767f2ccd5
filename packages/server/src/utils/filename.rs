/// Longest display name kept, in bytes.
pub const MAX_NAME_LEN: usize = 200;

/// Name used when nothing usable survives sanitizing.
pub const FALLBACK_NAME: &str = "renamed_file";

/// Reduce an uploaded filename to a safe display name.
///
/// Keeps only the last path component (either separator), replaces anything
/// outside `[A-Za-z0-9._-]` with `-`, truncates to [`MAX_NAME_LEN`] bytes and
/// falls back to [`FALLBACK_NAME`] for names that are empty or only dots.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    // Every kept char is ASCII, so any byte index is a char boundary.
    name.truncate(MAX_NAME_LEN);

    if name.is_empty() || name.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_string();
    }

    name
}

/// Build a safe `Content-Disposition` header value.
pub fn content_disposition_value(disposition: &str, filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| c.is_ascii_graphic() && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                String::from(b as char)
            }
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("{disposition}; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
