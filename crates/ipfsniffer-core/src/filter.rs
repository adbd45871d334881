//! Content filter applied per file during DAG traversal.

/// Skip/deny policy for fetched files.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub skip_ext: Vec<String>,
    pub skip_mime_prefix: Vec<String>,
    pub max_file_bytes: i64,
}

/// Why a file was not fetched or indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    ExtDenied,
    MimeDenied,
    LimitExceeded,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::TooLarge => "too_large",
            SkipReason::ExtDenied => "ext_denied",
            SkipReason::MimeDenied => "mime_denied",
            SkipReason::LimitExceeded => "limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub skip_reason: Option<SkipReason>,
}

impl Decision {
    fn deny(reason: SkipReason) -> Self {
        Decision { allowed: false, skip_reason: Some(reason) }
    }

    fn allow() -> Self {
        Decision { allowed: true, skip_reason: None }
    }
}

/// Lowercased file extension including the dot, or empty.
pub fn ext_of_path(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Decide whether a file should be fetched.
///
/// Checks are ordered: size cap, extension denylist, mime-prefix denylist.
/// The comparison is case-insensitive and an empty extension never matches.
pub fn decide(path: &str, mime: &str, size_bytes: i64, policy: &Policy) -> Decision {
    if policy.max_file_bytes > 0 && size_bytes > policy.max_file_bytes {
        return Decision::deny(SkipReason::TooLarge);
    }

    let ext = ext_of_path(path);
    if !ext.is_empty() {
        for s in &policy.skip_ext {
            if s.to_lowercase() == ext {
                return Decision::deny(SkipReason::ExtDenied);
            }
        }
    }

    let mime = mime.trim().to_lowercase();
    for prefix in &policy.skip_mime_prefix {
        let prefix = prefix.trim().to_lowercase();
        if !prefix.is_empty() && mime.starts_with(&prefix) {
            return Decision::deny(SkipReason::MimeDenied);
        }
    }

    Decision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy {
            skip_ext: vec![".zip".into(), ".png".into()],
            skip_mime_prefix: vec!["image/".into(), "video/".into()],
            max_file_bytes: 10,
        }
    }

    #[test]
    fn denies_listed_extension() {
        let d = decide("/x/f.png", "image/png", 1, &policy());
        assert!(!d.allowed);
        assert_eq!(d.skip_reason, Some(SkipReason::ExtDenied));
    }

    #[test]
    fn denies_mime_prefix() {
        let d = decide("/x/f.bin", "image/png", 1, &policy());
        assert!(!d.allowed);
        assert_eq!(d.skip_reason, Some(SkipReason::MimeDenied));
    }

    #[test]
    fn denies_oversized_file() {
        let d = decide("/x/f.txt", "text/plain", 11, &policy());
        assert!(!d.allowed);
        assert_eq!(d.skip_reason, Some(SkipReason::TooLarge));
    }

    #[test]
    fn size_at_cap_is_allowed() {
        let d = decide("/x/f.txt", "text/plain", 10, &policy());
        assert!(d.allowed);
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let d = decide("/x/F.PNG", "", 1, &policy());
        assert_eq!(d.skip_reason, Some(SkipReason::ExtDenied));

        let mut p = policy();
        p.skip_ext = vec![".ZIP".into()];
        let d = decide("/x/f.zip", "", 1, &p);
        assert_eq!(d.skip_reason, Some(SkipReason::ExtDenied));
    }

    #[test]
    fn empty_extension_never_matches() {
        let mut p = policy();
        p.skip_ext = vec!["".into()];
        let d = decide("/x/README", "text/plain", 1, &p);
        assert!(d.allowed);
    }

    #[test]
    fn allows_when_nothing_matches() {
        let d = decide("/x/f.txt", "text/plain", 1, &policy());
        assert!(d.allowed);
        assert_eq!(d.skip_reason, None);
    }

    #[test]
    fn extension_of_path() {
        assert_eq!(ext_of_path("/a/b/index.HTML"), ".html");
        assert_eq!(ext_of_path("/a/b/archive.tar.gz"), ".gz");
        assert_eq!(ext_of_path("/a/b/README"), "");
        assert_eq!(ext_of_path("/a/b/.hidden"), "");
    }
}
