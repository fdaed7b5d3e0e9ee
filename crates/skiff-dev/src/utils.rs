//! Small id and timing helpers shared across the dev server.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use path_clean::PathClean;

/// Whether an id uses an external URL scheme and must be kept verbatim.
pub fn is_external_url(id: &str) -> bool {
    id.starts_with("http://")
        || id.starts_with("https://")
        || id.starts_with("data:")
        || id.starts_with("node:")
}

/// Normalize a resolved id: collapse `.`/`..` segments and unify separators.
///
/// External URLs bypass this entirely (the container checks
/// [`is_external_url`] first); virtual ids starting with `\0` are also kept
/// as-is since they are not paths.
pub fn normalize_id(id: &str) -> String {
    if id.starts_with('\0') {
        return id.to_string();
    }
    Path::new(id)
        .clean()
        .to_string_lossy()
        .replace('\\', "/")
}

/// Strip query string and fragment from a URL.
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Wall-clock milliseconds, used to stamp HMR waves.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_external_url() {
        assert!(is_external_url("https://cdn.example.com/react.js"));
        assert!(is_external_url("data:text/javascript,export{}"));
        assert!(is_external_url("node:fs"));
        assert!(!is_external_url("/src/main.ts"));
        assert!(!is_external_url("./relative.ts"));
    }

    #[test]
    fn test_normalize_id_collapses_segments() {
        assert_eq!(normalize_id("/src/./a/../main.ts"), "/src/main.ts");
        assert_eq!(normalize_id("/src//main.ts"), "/src/main.ts");
    }

    #[test]
    fn test_normalize_id_keeps_virtual_ids() {
        assert_eq!(normalize_id("\0virtual:entry"), "\0virtual:entry");
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/src/a.ts?import&t=1"), "/src/a.ts");
        assert_eq!(clean_url("/src/a.ts#frag"), "/src/a.ts");
        assert_eq!(clean_url("/src/a.ts"), "/src/a.ts");
    }
}
