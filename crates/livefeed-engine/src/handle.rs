//! Handle normalization.

use std::sync::LazyLock;

use regex::Regex;

use livefeed_ipc::ConnectError;

static HANDLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_.]{1,24}$").expect("handle pattern is valid"));

/// Normalize a user-supplied handle.
///
/// Trims whitespace, strips one leading `@` and lowercases. The result must
/// be 1 to 24 characters of `a-z`, `0-9`, `_` or `.`.
pub fn normalize_handle(raw: &str) -> Result<String, ConnectError> {
    let trimmed = raw.trim();
    let handle = trimmed.strip_prefix('@').unwrap_or(trimmed).to_lowercase();

    if HANDLE_PATTERN.is_match(&handle) {
        Ok(handle)
    } else {
        Err(ConnectError::InvalidHandle(raw.to_string()))
    }
}
