//! Archive path sanitization.
//!
//! Two independent layers: [`validate_components`] rejects anything that
//! looks like traversal or injection at the string level, and
//! [`verify_containment`] lexically re-checks the joined result against
//! the destination root.

use std::path::{Component, Path, PathBuf};

use crate::config::Limits;
use crate::error::{ExtractError, Result};
use crate::tar::is_printable;

const FORBIDDEN_SEQUENCES: [&str; 5] = ["../", "..\\", "//", "\\\\", ":\\"];
const FORBIDDEN_LEADING: [char; 3] = ['/', '\\', '~'];
const SHELL_METACHARACTERS: [char; 5] = [';', '&', '$', '`', '|'];

/// Resolves an untrusted archive path to a location under `root`.
///
/// `root` is expected to be absolute.
pub fn sanitize_path(root: &Path, path_str: &str, limits: &Limits) -> Result<PathBuf> {
    let components = validate_components(path_str, limits)?;
    let joined = components
        .iter()
        .fold(root.to_path_buf(), |path, component| path.join(component));
    verify_containment(root, &joined)?;
    Ok(joined)
}

/// String-level validation. Returns the path's components, each of which
/// passed [`is_safe_component`].
pub fn validate_components<'a>(path_str: &'a str, limits: &Limits) -> Result<Vec<&'a str>> {
    if path_str.is_empty() || path_str.len() > limits.max_path_len {
        return Err(reject(path_str, "empty or too long"));
    }
    if !path_str.bytes().all(is_printable) {
        return Err(reject(path_str, "non-printable byte"));
    }
    if FORBIDDEN_SEQUENCES.iter().any(|seq| path_str.contains(seq))
        || path_str.starts_with(FORBIDDEN_LEADING)
        || path_str.contains(SHELL_METACHARACTERS)
    {
        return Err(reject(path_str, "forbidden sequence"));
    }

    // directory entries usually carry a trailing slash
    let trimmed = path_str.strip_suffix('/').unwrap_or(path_str);
    let mut components = Vec::new();
    for component in trimmed.split('/') {
        if components.len() == limits.max_path_depth {
            return Err(reject(path_str, "too deep"));
        }
        if !is_safe_component(component, limits.max_component_len) {
            return Err(reject(path_str, "unsafe component"));
        }
        components.push(component);
    }
    Ok(components)
}

/// Allow-list check for a single path component.
pub fn is_safe_component(component: &str, max_len: usize) -> bool {
    if component.is_empty() || component.len() > max_len {
        return false;
    }
    if component.starts_with('.') || component.ends_with('.') || component.contains("..") {
        return false;
    }
    component
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
}

/// Confirms `candidate` is a strict descendant of `root` after lexical
/// resolution of both.
pub fn verify_containment(root: &Path, candidate: &Path) -> Result<()> {
    let escapes = match lexical_relative(root, candidate) {
        Some(relative) => {
            relative.as_os_str().is_empty()
                || relative.is_absolute()
                || matches!(relative.components().next(), Some(Component::ParentDir))
        }
        None => true,
    };
    if escapes {
        log::warn!(
            "{} is not contained in {}",
            candidate.display(),
            root.display()
        );
        return Err(ExtractError::PathTraversalDetected);
    }
    Ok(())
}

/// Removes `.` components and folds `..` into their parent, without
/// touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = result.components().next_back();
                if matches!(last, Some(Component::Normal(_))) {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Path from `base` to `path`, computed lexically. A result starting with
/// `..` means `path` lies outside `base`; `None` means one path is absolute
/// and the other is not.
pub fn lexical_relative(base: &Path, path: &Path) -> Option<PathBuf> {
    let base = lexical_normalize(base);
    let path = lexical_normalize(path);
    if base.has_root() != path.has_root() {
        return None;
    }
    let base_parts: Vec<Component> = base.components().collect();
    let path_parts: Vec<Component> = path.components().collect();
    let common = base_parts
        .iter()
        .zip(&path_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    Some(relative)
}

fn reject(path_str: &str, reason: &str) -> ExtractError {
    log::warn!("rejecting entry path {:?}: {}", path_str, reason);
    ExtractError::PathTraversalDetected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static Path {
        Path::new("/opt/speedtest")
    }

    #[test]
    fn basic_path_sanitization() {
        let limits = Limits::default();
        let resolved = sanitize_path(root(), "speedtest-cli/speedtest", &limits).unwrap();
        assert_eq!(resolved, Path::new("/opt/speedtest/speedtest-cli/speedtest"));
    }

    #[test]
    fn trailing_slash_is_accepted() {
        let limits = Limits::default();
        let resolved = sanitize_path(root(), "data/", &limits).unwrap();
        assert_eq!(resolved, Path::new("/opt/speedtest/data"));
    }

    #[test]
    fn traversal_markers_rejected() {
        let limits = Limits::default();
        let malicious = [
            "../../etc/passwd",
            "..",
            "a/..",
            "a/../b",
            "..\\windows\\system32",
            "/etc/passwd",
            "\\server\\share",
            "~/.ssh/authorized_keys",
            "a//b",
            "C:\\evil",
            "./a",
            "a/./b",
            "a/.hidden",
            "trailing.",
            "a..b",
        ];
        for path in malicious {
            assert_eq!(
                sanitize_path(root(), path, &limits),
                Err(ExtractError::PathTraversalDetected),
                "{:?} should be rejected",
                path
            );
        }
    }

    #[test]
    fn shell_metacharacters_rejected() {
        let limits = Limits::default();
        for path in ["a;rm", "a&b", "$HOME", "`id`", "a|b"] {
            assert!(validate_components(path, &limits).is_err(), "{:?}", path);
        }
    }

    #[test]
    fn disallowed_characters_rejected() {
        let limits = Limits::default();
        for path in ["a\tb", "a*b", "a\"b", "caf\u{e9}", "a\nb", "a:b", "a\\b"] {
            assert!(validate_components(path, &limits).is_err(), "{:?}", path);
        }
    }

    #[test]
    fn allowed_characters_accepted() {
        let limits = Limits::default();
        let components = validate_components("My Dir/file-1_v2.tar.gz", &limits).unwrap();
        assert_eq!(components, vec!["My Dir", "file-1_v2.tar.gz"]);
    }

    #[test]
    fn depth_limit() {
        let limits = Limits::default();
        let at_limit = vec!["d"; 20].join("/");
        assert!(validate_components(&at_limit, &limits).is_ok());
        let over_limit = vec!["d"; 21].join("/");
        assert!(validate_components(&over_limit, &limits).is_err());
    }

    #[test]
    fn length_limits() {
        let limits = Limits::default();
        assert!(validate_components("", &limits).is_err());
        assert!(validate_components(&"a".repeat(255), &limits).is_ok());
        assert!(validate_components(&"a".repeat(256), &limits).is_err());

        let tight = Limits {
            max_path_len: 10,
            ..Limits::default()
        };
        assert!(validate_components("abcde/fghij", &tight).is_err());
        assert!(validate_components("abcd/fghij", &tight).is_ok());
    }

    #[test]
    fn containment_check_is_independent() {
        let base = root();
        assert!(verify_containment(base, &base.join("a/b")).is_ok());
        assert!(verify_containment(base, base).is_err());
        assert!(verify_containment(base, Path::new("/opt/speedtest/../etc")).is_err());
        assert!(verify_containment(base, Path::new("/opt/other")).is_err());
        assert!(verify_containment(base, Path::new("relative/path")).is_err());
        assert!(verify_containment(base, Path::new("/opt/speedtest/a/../../x")).is_err());
        assert!(verify_containment(base, Path::new("/opt/speedtest/a/../b")).is_ok());
    }

    #[test]
    fn lexical_relative_paths() {
        let base = Path::new("/a/b");
        let relative = |p: &str| lexical_relative(base, Path::new(p));
        assert_eq!(relative("/a/b/c"), Some(PathBuf::from("c")));
        assert_eq!(relative("/a/b"), Some(PathBuf::new()));
        assert_eq!(relative("/a/x"), Some(PathBuf::from("../x")));
        assert_eq!(relative("/a/b/./c/../d"), Some(PathBuf::from("d")));
        assert_eq!(relative("a/b/c"), None);
    }

    #[test]
    fn lexical_normalize_paths() {
        assert_eq!(lexical_normalize(Path::new("/a/./b/../c")), Path::new("/a/c"));
        assert_eq!(lexical_normalize(Path::new("/../a")), Path::new("/a"));
        assert_eq!(lexical_normalize(Path::new("../a")), Path::new("../a"));
    }
}
