//! Router Mount Policy
//!
//! Plugins hand routers to the host together with a path prefix. Prefixes are
//! normalized before mounting so that `"api/"`, `"/api"` and `"//api//"` all
//! land on `/api`, and so that `""` or `"/"` mount at the host root.
//!
//! No uniqueness check is made across plugins. Two plugins may mount under
//! the same prefix; axum's route table decides what happens at request time
//! and refuses identical method+path pairs when the routers are merged.

use axum::Router;

use super::error::MountError;

/// Path separator used by the routing surface
pub const SEPARATOR: char = '/';

/// Characters a prefix may not contain: route captures, wildcards,
/// query and fragment markers
const FORBIDDEN: &[char] = &['{', '}', '*', '?', '#'];

/// A router waiting to be mounted, with its normalized prefix
#[derive(Clone)]
pub struct MountedRouter {
    pub prefix: String,
    pub router: Router,
}

impl std::fmt::Debug for MountedRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedRouter")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl MountedRouter {
    /// Validate and normalize `prefix`, pairing it with `router`
    pub fn new(prefix: &str, router: Router) -> Result<Self, MountError> {
        Ok(Self {
            prefix: validate_prefix(prefix)?,
            router,
        })
    }

    /// Display form of the prefix (`/` for root mounts)
    pub fn display_prefix(&self) -> &str {
        if self.prefix.is_empty() { "/" } else { &self.prefix }
    }
}

/// Normalize a prefix
///
/// Trailing separators are stripped, then leading ones; if anything remains
/// exactly one leading separator is put back. All-separator and empty inputs
/// become the empty prefix.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix
        .trim_end_matches(SEPARATOR)
        .trim_start_matches(SEPARATOR);

    if trimmed.is_empty() {
        String::new()
    } else {
        let mut normalized = String::with_capacity(trimmed.len() + 1);
        normalized.push(SEPARATOR);
        normalized.push_str(trimmed);
        normalized
    }
}

/// Normalize a prefix and reject ones the routing surface cannot host
pub fn validate_prefix(prefix: &str) -> Result<String, MountError> {
    if let Some(c) = prefix.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(MountError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: format!("character '{}' is not allowed in a mount prefix", c),
        });
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(MountError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "whitespace is not allowed in a mount prefix".to_string(),
        });
    }
    Ok(normalize_prefix(prefix))
}

/// Attach `router` to `base` under a normalized `prefix`
///
/// The empty prefix merges at the root; anything else is nested. axum panics
/// on conflicting routes, so callers that need to survive a conflict run this
/// under panic isolation.
pub fn attach(base: Router, mounted: &MountedRouter) -> Router {
    let router = mounted.router.clone();
    if mounted.prefix.is_empty() {
        base.merge(router)
    } else {
        base.nest(&mounted.prefix, router)
    }
}
