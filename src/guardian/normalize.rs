//! Output normalization and digesting for loop detection.
//!
//! Generated output routinely differs only in incidental details: the time
//! it was produced, the address an object happened to live at, the temp
//! directory a file was written to. [`normalize`] replaces each of those
//! categories with a fixed placeholder so that [`digest`] is stable across
//! attempts that are semantically the same.
//!
//! # Example
//!
//! ```
//! use conductor::guardian::normalize::{digest, normalize};
//!
//! let a = "panic at 2026-02-13T10:30:00Z in /tmp/run_1/main.py (0x7ffd1234)";
//! let b = "panic at 2026-02-14T08:01:59Z in /tmp/run_2/main.py (0x55aa9f00)";
//! assert_eq!(normalize(a), normalize(b));
//! assert_eq!(digest(a), digest(b));
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Placeholder for ISO-8601-like timestamps.
pub const TIMESTAMP_TOKEN: &str = "[TIMESTAMP]";
/// Placeholder for long decimal runs (Unix timestamps, nanosecond counters).
pub const UNIX_TS_TOKEN: &str = "[UNIX_TS]";
/// Placeholder for hexadecimal addresses.
pub const HEX_TOKEN: &str = "[HEX_ADDR]";
/// Placeholder for absolute filesystem paths.
pub const PATH_TOKEN: &str = "[PATH]";

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("timestamp pattern is valid")
});

static LONG_DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{10,}\b").expect("decimal pattern is valid"));

static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0[xX][0-9a-fA-F]+").expect("hex pattern is valid"));

static ITERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(iteration)\s+\d+").expect("iteration pattern is valid"));

static WINDOWS_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Spaces are part of the path (`C:\Program Files\...`); newlines are not.
    Regex::new(r"\b[A-Za-z]:\\[\w\-. \t\\]+").expect("windows path pattern is valid")
});

// The leading group keeps relative paths like `src/lib.rs` intact: a POSIX
// path only counts when it starts a line or follows a non-path character.
static POSIX_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(^|[^\w.\-/\]])/(?:[\w\-.]+/)+[\w\-.]+").expect("posix path pattern is valid")
});

static PID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpid=(?:\[[A-Z_]+\]|[0-9A-Za-z]+)").expect("pid pattern is valid")
});

static TID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btid=(?:\[[A-Z_]+\]|[0-9A-Za-z]+)").expect("tid pattern is valid")
});

/// Strip volatile substrings from `text`.
///
/// Categories are replaced in a fixed order: timestamps, long decimal runs,
/// hex addresses, `iteration <n>` phrases, absolute paths (Windows, then
/// POSIX), and finally `pid=`/`tid=` pairs.
#[must_use]
pub fn normalize(text: &str) -> String {
    let out = TIMESTAMP_RE.replace_all(text, TIMESTAMP_TOKEN);
    let out = LONG_DECIMAL_RE.replace_all(&out, UNIX_TS_TOKEN);
    let out = HEX_RE.replace_all(&out, HEX_TOKEN);
    let out = ITERATION_RE.replace_all(&out, "${1} [N]");
    let out = WINDOWS_PATH_RE.replace_all(&out, PATH_TOKEN);
    let out = POSIX_PATH_RE.replace_all(&out, "${1}[PATH]");
    let out = PID_RE.replace_all(&out, "pid=[PID]");
    let out = TID_RE.replace_all(&out, "tid=[TID]");
    out.into_owned()
}

/// SHA-256 of the normalized text, lowercase hex.
#[must_use]
pub fn digest(text: &str) -> String {
    let normalized = normalize(text);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_are_stripped() {
        let out = normalize("built at 2026-02-13T10:30:00Z and 2026-02-13 10:30:00.123+01:00");
        assert_eq!(out, "built at [TIMESTAMP] and [TIMESTAMP]");
    }

    #[test]
    fn test_unix_timestamps_are_stripped() {
        assert_eq!(normalize("epoch 1760000000 ok"), "epoch [UNIX_TS] ok");
        // Short numbers are meaningful and stay.
        assert_eq!(normalize("exit 42"), "exit 42");
    }

    #[test]
    fn test_hex_addresses_are_stripped() {
        assert_eq!(
            normalize("<object at 0x7ffd5e8c1a20>"),
            "<object at [HEX_ADDR]>"
        );
    }

    #[test]
    fn test_iteration_counter_is_stripped() {
        assert_eq!(normalize("Iteration 7 failed"), "Iteration [N] failed");
        assert_eq!(normalize("iteration 12"), "iteration [N]");
    }

    #[test]
    fn test_windows_paths_are_stripped() {
        let out = normalize(r"Error at C:\Users\dev\main.py:42");
        assert_eq!(out, "Error at [PATH]:42");
    }

    #[test]
    fn test_windows_paths_with_spaces_are_stripped() {
        let a = r"Error at C:\Users\John Doe\proj_a\main.py";
        let b = r"Error at D:\Program Files\proj_b\main.py";
        assert_eq!(normalize(a), "Error at [PATH]");
        assert_eq!(digest(a), digest(b));
        assert_eq!(
            normalize("at C:\\x y\\a.py\nnext line"),
            "at [PATH]\nnext line"
        );
    }

    #[test]
    fn test_posix_paths_are_stripped() {
        assert_eq!(
            normalize("File \"/tmp/hc_task_1/main.py\", line 3"),
            "File \"[PATH]\", line 3"
        );
        assert_eq!(normalize("/home/dev/project/x.rs"), "[PATH]");
    }

    #[test]
    fn test_relative_paths_are_kept() {
        assert_eq!(normalize("see src/guardian/mod.rs"), "see src/guardian/mod.rs");
    }

    #[test]
    fn test_pid_and_tid_are_stripped() {
        assert_eq!(
            normalize("worker pid=4312 tid=77 exited"),
            "worker pid=[PID] tid=[TID] exited"
        );
        // Large ids are caught by the decimal rule first and still collapse.
        assert_eq!(normalize("pid=12345678901"), "pid=[PID]");
    }

    #[test]
    fn test_digest_invariant_over_volatile_categories() {
        let a = "2026-02-13T10:30:00Z pid=100 tid=3 at 0xdeadbeef in /var/run/a/b.log iteration 1";
        let b = "2027-12-01T23:59:59Z pid=999 tid=42 at 0x00c0ffee in /opt/other/c.log iteration 9";
        assert_eq!(digest(a), digest(b));
    }

    #[test]
    fn test_digest_differs_for_different_content() {
        assert_ne!(digest("print('a')"), digest("print('b')"));
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let d = digest("hello");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            d,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
