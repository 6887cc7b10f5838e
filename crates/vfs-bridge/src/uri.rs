//! String-level URI helpers.
//!
//! The bridge treats URIs as opaque strings owned by the host; only the
//! scheme and the last path segment are ever inspected here.

/// The scheme of `uri`: the text before the first `:`.
///
/// Returns `None` when there is no `:` or the scheme would be empty.
///
/// ```
/// use vfs_bridge::uri::scheme_of;
///
/// assert_eq!(scheme_of("file:///tmp/a.txt"), Some("file"));
/// assert_eq!(scheme_of("project://demo/src"), Some("project"));
/// assert_eq!(scheme_of("/no/scheme"), None);
/// ```
#[must_use]
pub fn scheme_of(uri: &str) -> Option<&str> {
    match uri.split_once(':') {
        Some((scheme, _)) if !scheme.is_empty() => Some(scheme),
        _ => None,
    }
}

/// The text after the last `/`, ignoring a trailing separator.
#[must_use]
pub fn last_segment(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Whether the final path segment looks like a file name (contains a `.`).
///
/// Used to guess the entry type of something that no longer exists.
/// Extensionless files and dotted directory names are misclassified.
#[must_use]
pub fn looks_like_file(uri: &str) -> bool {
    last_segment(uri).contains('.')
}

/// Whether `scheme` is a syntactically valid URI scheme
/// (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`).
#[must_use]
pub fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("file:///a/b.txt", Some("file"))]
    #[case("std:///util/Math.rsc", Some("std"))]
    #[case("mem:/", Some("mem"))]
    #[case(":nothing", None)]
    #[case("relative/path", None)]
    fn scheme_is_text_before_first_colon(#[case] uri: &str, #[case] expected: Option<&str>) {
        assert_eq!(scheme_of(uri), expected);
    }

    #[rstest]
    #[case("file:///a/b.txt", "b.txt")]
    #[case("file:///a/dir/", "dir")]
    #[case("mem:/", "mem:")]
    #[case("name", "name")]
    fn last_segment_after_separator(#[case] uri: &str, #[case] expected: &str) {
        assert_eq!(last_segment(uri), expected);
    }

    #[rstest]
    #[case("file:///a/b.txt", true)]
    #[case("file:///a.d/Makefile", false)]
    #[case("file:///a/.gitignore", true)]
    #[case("file:///a/src", false)]
    fn dotted_names_look_like_files(#[case] uri: &str, #[case] expected: bool) {
        assert_eq!(looks_like_file(uri), expected);
    }

    #[rstest]
    #[case("file", true)]
    #[case("vscode-remote", true)]
    #[case("svn+ssh", true)]
    #[case("1abc", false)]
    #[case("", false)]
    #[case("has space", false)]
    fn validates_scheme_syntax(#[case] scheme: &str, #[case] expected: bool) {
        assert_eq!(is_valid_scheme(scheme), expected);
    }
}
