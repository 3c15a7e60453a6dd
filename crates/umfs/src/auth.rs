//! Authorization hook.
//!
//! Handlers are registered per file category (the lowercased extension,
//! `png`, `pdf`, ...) with an optional `*` handler catching everything else.
//! Files no handler claims get the provider's [`AccessDefault`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handle::FileHandle;

/// Category key matching every file no specific handler claims.
pub const WILDCARD_CATEGORY: &str = "*";

/// Decides whether an existing file may be handed out.
pub trait AuthorizationHandler: Send + Sync {
    fn can_access(&self, file: &FileHandle) -> bool;
}

impl<F> AuthorizationHandler for F
where
    F: Fn(&FileHandle) -> bool + Send + Sync,
{
    fn can_access(&self, file: &FileHandle) -> bool {
        self(file)
    }
}

/// Outcome for files with no registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDefault {
    #[default]
    Allow,
    Deny,
}

/// Handlers keyed by file category.
#[derive(Clone, Default)]
pub struct AuthorizationRegistry {
    handlers: HashMap<String, Arc<dyn AuthorizationHandler>>,
}

impl fmt::Debug for AuthorizationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<_> = self.handlers.keys().collect();
        categories.sort();
        f.debug_struct("AuthorizationRegistry")
            .field("categories", &categories)
            .finish()
    }
}

impl AuthorizationRegistry {
    /// Register `handler` for `category`, replacing any previous one.
    pub fn register(&mut self, category: &str, handler: Arc<dyn AuthorizationHandler>) {
        self.handlers.insert(normalize_category(category), handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler responsible for `file`, if any.
    pub fn resolve(&self, file: &FileHandle) -> Option<&Arc<dyn AuthorizationHandler>> {
        file.category()
            .and_then(|c| self.handlers.get(&c))
            .or_else(|| self.handlers.get(WILDCARD_CATEGORY))
    }

    /// Run the hook for a persisted file.
    ///
    /// New handles are always allowed: access control guards existing
    /// content, not placeholders.
    pub fn check(&self, file: &FileHandle, default: AccessDefault) -> bool {
        if file.is_new() {
            return true;
        }
        match self.resolve(file) {
            Some(handler) => handler.can_access(file),
            None => default == AccessDefault::Allow,
        }
    }
}

fn normalize_category(category: &str) -> String {
    category.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_category() {
        assert_eq!(normalize_category(".PNG"), "png");
        assert_eq!(normalize_category(" * "), "*");
    }

    #[test]
    fn test_access_default_serde() {
        let parsed: AccessDefault = ron::from_str("deny").unwrap();
        assert_eq!(parsed, AccessDefault::Deny);
        assert_eq!(AccessDefault::default(), AccessDefault::Allow);
    }

    #[test]
    fn test_debug_lists_categories() {
        let mut registry = AuthorizationRegistry::default();
        registry.register("pdf", Arc::new(|_: &FileHandle| false));
        registry.register("*", Arc::new(|_: &FileHandle| true));
        let rendered = format!("{registry:?}");
        assert!(rendered.contains("\"*\""));
        assert!(rendered.contains("\"pdf\""));
    }
}
