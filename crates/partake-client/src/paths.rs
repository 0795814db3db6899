//! Validation of peer-supplied relative paths.
//!
//! Every path that arrives in a `file-request` or `upload-start` is hostile
//! input until proven otherwise. Request paths must stay inside the share
//! root; upload paths additionally have to be safe to *create* on common
//! filesystems, which brings in depth, component length, and the Windows
//! reserved device names.

use crate::error::ClientError;

/// Longest accepted path component.
pub const MAX_COMPONENT_LEN: usize = 255;

/// Deepest accepted upload path.
pub const MAX_PATH_DEPTH: usize = 10;

/// Device names Windows reserves regardless of extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a path naming an existing file in the share.
///
/// Rejects empty paths, traversal (`..`), absolute and drive-letter
/// prefixes, backslashes, and control characters.
///
/// # Errors
///
/// Returns `ClientError::InvalidPath` naming the failed rule.
pub fn validate_request_path(path: &str) -> Result<(), ClientError> {
    if path.is_empty() {
        return Err(invalid(path, "empty"));
    }
    if path.contains('\\') {
        return Err(invalid(path, "backslash"));
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(invalid(path, "control character"));
    }
    if path.starts_with('/') {
        return Err(invalid(path, "absolute"));
    }
    if has_drive_prefix(path) {
        return Err(invalid(path, "drive letter"));
    }
    for component in path.split('/') {
        if component.is_empty() {
            return Err(invalid(path, "empty component"));
        }
        if component == "." || component == ".." {
            return Err(invalid(path, "traversal"));
        }
    }
    Ok(())
}

/// Validate a destination path for an upload.
///
/// Everything [`validate_request_path`] checks, plus depth, component
/// length, reserved device names, and dot-edged components.
///
/// # Errors
///
/// Returns `ClientError::InvalidPath` naming the failed rule.
pub fn validate_upload_path(path: &str) -> Result<(), ClientError> {
    validate_request_path(path)?;

    let components: Vec<&str> = path.split('/').collect();
    if components.len() > MAX_PATH_DEPTH {
        return Err(invalid(path, "too deep"));
    }
    for component in components {
        if component.len() > MAX_COMPONENT_LEN {
            return Err(invalid(path, "component too long"));
        }
        if component.starts_with('.') || component.ends_with('.') {
            return Err(invalid(path, "dot-edged component"));
        }
        let stem = component.split('.').next().unwrap_or(component);
        if RESERVED_NAMES
            .iter()
            .any(|name| stem.eq_ignore_ascii_case(name))
        {
            return Err(invalid(path, "reserved device name"));
        }
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn invalid(path: &str, rule: &str) -> ClientError {
    ClientError::InvalidPath(format!("{path:?}: {rule}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_normal_paths() {
        for path in [
            "report.pdf",
            "docs/report.pdf",
            "deep/a/b/c/file.txt",
            "name with spaces.txt",
            "unicode-日本語.txt",
        ] {
            assert!(validate_request_path(path).is_ok(), "{path}");
            assert!(validate_upload_path(path).is_ok(), "{path}");
        }
    }

    #[test]
    fn test_rejects_traversal() {
        for path in [
            "../../etc/passwd",
            "docs/../secret",
            "..",
            "./file",
            "a/./b",
        ] {
            assert!(validate_request_path(path).is_err(), "{path}");
        }
    }

    #[test]
    fn test_rejects_absolute_and_drives() {
        for path in ["/etc/passwd", "C:/windows", "c:file", "C:\\windows"] {
            assert!(validate_request_path(path).is_err(), "{path}");
        }
    }

    #[test]
    fn test_rejects_separator_abuse() {
        for path in ["", "a//b", "a/", "/", "back\\slash", "nul\0byte"] {
            assert!(validate_request_path(path).is_err(), "{path:?}");
        }
    }

    #[test]
    fn test_upload_depth_and_length() {
        let deep = (0..11).map(|_| "d").collect::<Vec<_>>().join("/");
        assert!(validate_upload_path(&deep).is_err());
        let ten = (0..10).map(|_| "d").collect::<Vec<_>>().join("/");
        assert!(validate_upload_path(&ten).is_ok());

        let long = "x".repeat(256);
        assert!(validate_upload_path(&long).is_err());
        assert!(validate_upload_path(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_upload_reserved_names() {
        for path in ["CON", "con.txt", "docs/NUL.pdf", "lpt1", "aux.tar.gz"] {
            assert!(validate_upload_path(path).is_err(), "{path}");
        }
        // a request for an existing oddly-named file is still fine
        assert!(validate_request_path("con.txt").is_ok());
        // names merely containing a reserved word pass
        assert!(validate_upload_path("console.log").is_ok());
        assert!(validate_upload_path("config").is_ok());
    }

    #[test]
    fn test_upload_dot_edges() {
        for path in [".hidden", "dir/.git", "trailing."] {
            assert!(validate_upload_path(path).is_err(), "{path}");
        }
    }
}
