//! Document selector matching
//!
//! A session claims documents through LSP document filters. A filter matches
//! when every field it sets matches; a selector matches when any filter does.

use globset::GlobBuilder;
use lsp_types::DocumentFilter;
use std::path::Path;

use crate::scope::DocumentRef;

/// Whether any filter of the selector matches the document
pub fn selector_matches(selector: &[DocumentFilter], document: &DocumentRef) -> bool {
    selector
        .iter()
        .any(|filter| filter_matches(filter, document))
}

/// Whether a single filter matches the document
pub fn filter_matches(filter: &DocumentFilter, document: &DocumentRef) -> bool {
    if let Some(scheme) = &filter.scheme {
        if scheme != document.scheme() {
            return false;
        }
    }
    if let Some(language) = &filter.language {
        if language != &document.language_id {
            return false;
        }
    }
    match &filter.pattern {
        Some(pattern) => document
            .fs_path()
            .is_some_and(|path| pattern_matches(pattern, &path)),
        None => true,
    }
}

fn pattern_matches(pattern: &str, path: &Path) -> bool {
    match GlobBuilder::new(pattern).build() {
        Ok(glob) => glob.compile_matcher().is_match(path),
        // Paths with unbalanced glob metacharacters are compared literally
        Err(_) => Path::new(pattern) == path,
    }
}
