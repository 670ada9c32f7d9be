//! String helpers shared by the QR parser and the header code

use percent_encoding::percent_decode_str;
use rand_core::RngCore;

/// Random bytes behind one generated id; encodes to 12 URL-safe characters
pub const CREATE_ID_BYTES: usize = 9;

/// Trim an address and drop a leading `mailto:`
///
/// Case is preserved; comparisons between addresses are case-insensitive.
pub fn normalize_addr(addr: &str) -> String {
    let trimmed = addr.trim();
    let without_scheme = strip_prefix_ignore_case(trimmed, "mailto:").unwrap_or(trimmed);
    without_scheme.trim().to_string()
}

/// Case-insensitive address comparison
pub fn addr_cmp(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Loose plausibility check for an e-mail address
pub fn may_be_valid_addr(addr: &str) -> bool {
    addr.len() >= 3 && addr.contains('@') && addr.contains('.')
}

/// Normalize a display name
///
/// Surrounding quotes are removed and `Last, First` becomes `First Last`.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.trim();
    for quote in ['"', '\''] {
        if name.len() >= 2 && name.starts_with(quote) && name.ends_with(quote) {
            name = name[1..name.len() - 1].trim();
        }
    }

    match name.split_once(',') {
        Some((last, first)) => format!("{} {}", first.trim(), last.trim())
            .trim()
            .to_string(),
        None => name.to_string(),
    }
}

/// `application/x-www-form-urlencoded` encoding as used inside QR fragments
pub fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Percent-decode a value; `+` is kept as is
pub fn url_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Percent-decode a form value, turning `+` into a space
pub fn url_decode_form(value: &str) -> String {
    url_decode(&value.replace('+', " "))
}

/// Strip `prefix` from `s`, comparing ASCII case-insensitively
pub fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Create a random, URL-safe identifier
pub fn create_id() -> String {
    create_id_with_len(CREATE_ID_BYTES)
}

/// Create a random, URL-safe identifier from `bytes` random bytes
pub fn create_id_with_len(bytes: usize) -> String {
    use base64::{engine::general_purpose, Engine as _};
    let mut buf = vec![0u8; bytes];
    rand_core::OsRng.fill_bytes(&mut buf);
    general_purpose::URL_SAFE_NO_PAD.encode(buf)
}
