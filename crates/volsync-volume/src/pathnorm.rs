//! Remote path normalization
//!
//! Remote hosts report paths in shapes the engine must never see: Windows
//! separators, duplicate slashes, `.`/`..` segments, and the SFTP-server-
//! on-Windows hybrid where a POSIX-style path embeds a drive letter
//! (`/C:/Users/x`). Normalization is kept here, away from the diff
//! engine, so backend quirks stay a volume concern.

use volsync_types::RelPath;

/// Normalize a remote absolute path.
///
/// Backslashes become `/`, duplicate separators collapse, `.` segments
/// drop, `..` segments resolve against the stack (never above the root
/// of an absolute path), and a Windows drive prefix — either `C:/...` or
/// the SFTP hybrid `/C:/...` — is preserved verbatim in front.
pub fn normalize_remote(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut rest = unified.as_str();

    // Peel off a drive-letter prefix, with or without a leading slash.
    let mut drive = String::new();
    let stripped = rest.strip_prefix('/').unwrap_or(rest);
    if stripped.len() >= 2
        && stripped.as_bytes()[1] == b':'
        && stripped.as_bytes()[0].is_ascii_alphabetic()
    {
        if rest.starts_with('/') {
            drive.push('/');
        }
        drive.push_str(&stripped[..2]);
        rest = &stripped[2..];
    }

    let absolute = rest.starts_with('/') || !drive.is_empty();

    let mut stack: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|last| *last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
                // absolute and empty: cannot go above the root
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    if !drive.is_empty() {
        format!("{drive}/{joined}")
    } else if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Whether a normalized path has the Windows drive-letter shape.
pub fn looks_like_windows_path(path: &str) -> bool {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    stripped.len() >= 2
        && stripped.as_bytes()[1] == b':'
        && stripped.as_bytes()[0].is_ascii_alphabetic()
}

/// Resolve a [`RelPath`] against a normalized remote root.
pub fn join_remote(root: &str, rel: &RelPath) -> String {
    if rel.is_root() {
        root.to_string()
    } else if root.ends_with('/') {
        format!("{root}{rel}", rel = rel.as_str())
    } else {
        format!("{root}/{rel}", rel = rel.as_str())
    }
}

/// Convert a normalized remote path to the native Windows form PowerShell
/// tools expect and report: the hybrid leading slash is chopped off and
/// separators become backslashes.
pub fn windows_native(path: &str) -> String {
    let stripped = if looks_like_windows_path(path) {
        path.strip_prefix('/').unwrap_or(path)
    } else {
        path
    };
    stripped.replace('/', "\\")
}

/// Quote a string for a POSIX shell command line.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote a string for embedding in a PowerShell single-quoted literal.
pub fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/a//b/./c", "/a/b/c")]
    #[case("/a/b/../c", "/a/c")]
    #[case("/../a", "/a")]
    #[case("a/../../b", "../b")]
    #[case("C:\\Users\\x", "C:/Users/x")]
    #[case("/C:/Users//x/.", "/C:/Users/x")]
    #[case("relative/dir", "relative/dir")]
    #[case("a/..", ".")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_remote(input), expected);
    }

    #[test]
    fn windows_shapes_are_recognized() {
        assert!(looks_like_windows_path("/C:/Users"));
        assert!(looks_like_windows_path("D:/data"));
        assert!(!looks_like_windows_path("/home/user"));
        assert!(!looks_like_windows_path("relative"));
    }

    #[test]
    fn native_windows_conversion() {
        assert_eq!(windows_native("/C:/Users/x"), "C:\\Users\\x");
        assert_eq!(windows_native("C:/data"), "C:\\data");
    }

    #[test]
    fn join_remote_handles_root() {
        let rel = RelPath::new("a/b").unwrap();
        assert_eq!(join_remote("/srv/data", &rel), "/srv/data/a/b");
        assert_eq!(join_remote("/srv/data", &RelPath::root()), "/srv/data");
        assert_eq!(join_remote("/", &rel), "/a/b");
    }

    #[test]
    fn shell_quoting_escapes_single_quotes() {
        assert_eq!(sh_quote("it's"), "'it'\\''s'");
        assert_eq!(ps_quote("it's"), "'it''s'");
        assert_eq!(sh_quote("a$b"), "'a$b'");
    }
}
