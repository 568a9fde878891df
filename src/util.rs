//! Small shared helpers.

/// Truncate a string to at most `max_len` bytes without splitting a UTF-8
/// character, appending an ellipsis when anything was cut.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Resident set size of the current process in bytes, read from
/// `/proc/self/statm`. Returns `None` where the platform does not expose it.
#[cfg(target_os = "linux")]
pub fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
pub fn current_rss_bytes() -> Option<u64> {
    None
}

/// Resident set size in whole megabytes, if available.
pub fn current_rss_mb() -> Option<u64> {
    current_rss_bytes().map(|bytes| bytes / (1024 * 1024))
}
