//! Scope decision table
//!
//! Rules are evaluated in order and the first decisive one wins. Each rule
//! either ignores the document, resolves it to a [`ScopeDescriptor`], or passes
//! it on to the next rule.

use lsp_types::DocumentFilter;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::scope::{
    DocumentRef, FILE_SCHEME, NOTEBOOK_CELL_SCHEMES, R_LANGUAGE_ID, RMD_LANGUAGE_ID,
    ScopeDescriptor, ScopeKey, ScopeKind, UNTITLED_SCHEME, Workspace, WorkspaceFolder,
    is_target_language, path_string,
};

/// What a rule decided about a document
#[derive(Debug)]
enum RuleOutcome {
    /// The document is not served by any session
    Ignore,
    /// The document belongs to this scope
    Resolved(ScopeDescriptor),
    /// This rule has no opinion
    Continue,
}

/// Facts a rule may look at
struct RuleInput<'a> {
    document: &'a DocumentRef,
    folder: Option<&'a WorkspaceFolder>,
    home_dir: &'a Path,
}

type Rule = fn(&RuleInput<'_>) -> RuleOutcome;

/// The decision table, in evaluation order
const RULES: [(&str, Rule); 6] = [
    ("supported-scheme", supported_scheme),
    ("target-language", target_language),
    ("notebook-cell", notebook_cell),
    ("workspace-folder", workspace_folder),
    ("untitled", untitled),
    ("stray-file", stray_file),
];

fn filter(scheme: &str, language: Option<&str>, pattern: Option<String>) -> DocumentFilter {
    DocumentFilter {
        language: language.map(str::to_string),
        scheme: Some(scheme.to_string()),
        pattern,
    }
}

fn parent_or_self(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => path.to_path_buf(),
    }
}

fn supported_scheme(input: &RuleInput<'_>) -> RuleOutcome {
    let scheme = input.document.scheme();
    if scheme == FILE_SCHEME || scheme == UNTITLED_SCHEME || NOTEBOOK_CELL_SCHEMES.contains(&scheme)
    {
        RuleOutcome::Continue
    } else {
        RuleOutcome::Ignore
    }
}

fn target_language(input: &RuleInput<'_>) -> RuleOutcome {
    if is_target_language(&input.document.language_id) {
        return RuleOutcome::Continue;
    }

    // Files outside every workspace folder get a session whatever their
    // language id. Kept for compatibility with existing editor setups.
    if input.document.scheme() == FILE_SCHEME && input.folder.is_none() {
        return RuleOutcome::Continue;
    }

    RuleOutcome::Ignore
}

fn notebook_cell(input: &RuleInput<'_>) -> RuleOutcome {
    let document = input.document;
    if !document.is_notebook_cell() {
        return RuleOutcome::Continue;
    }
    let Some(notebook_path) = document.fs_path() else {
        return RuleOutcome::Ignore;
    };

    RuleOutcome::Resolved(ScopeDescriptor {
        key: ScopeKey::notebook(&notebook_path),
        kind: ScopeKind::Notebook,
        document_selector: vec![filter(
            document.scheme(),
            Some(R_LANGUAGE_ID),
            Some(path_string(&notebook_path)),
        )],
        working_directory: parent_or_self(&notebook_path),
        workspace_folder: input.folder.cloned(),
    })
}

fn workspace_folder(input: &RuleInput<'_>) -> RuleOutcome {
    let Some(folder) = input.folder else {
        return RuleOutcome::Continue;
    };
    let Some(folder_path) = folder.path() else {
        return RuleOutcome::Ignore;
    };

    let pattern = format!("{}/**/*", path_string(&folder_path));
    RuleOutcome::Resolved(ScopeDescriptor {
        key: ScopeKey::for_folder(folder),
        kind: ScopeKind::WorkspaceFolder,
        document_selector: vec![
            filter(FILE_SCHEME, Some(R_LANGUAGE_ID), Some(pattern.clone())),
            filter(FILE_SCHEME, Some(RMD_LANGUAGE_ID), Some(pattern)),
        ],
        working_directory: folder_path,
        workspace_folder: Some(folder.clone()),
    })
}

fn untitled(input: &RuleInput<'_>) -> RuleOutcome {
    if !input.document.is_untitled() {
        return RuleOutcome::Continue;
    }

    RuleOutcome::Resolved(ScopeDescriptor {
        key: ScopeKey::untitled(),
        kind: ScopeKind::Untitled,
        document_selector: vec![
            filter(UNTITLED_SCHEME, Some(R_LANGUAGE_ID), None),
            filter(UNTITLED_SCHEME, Some(RMD_LANGUAGE_ID), None),
        ],
        working_directory: input.home_dir.to_path_buf(),
        workspace_folder: None,
    })
}

fn stray_file(input: &RuleInput<'_>) -> RuleOutcome {
    let document = input.document;
    if document.scheme() != FILE_SCHEME {
        return RuleOutcome::Continue;
    }
    let Some(path) = document.fs_path() else {
        return RuleOutcome::Ignore;
    };

    RuleOutcome::Resolved(ScopeDescriptor {
        key: ScopeKey::from_uri(&document.uri),
        kind: ScopeKind::StrayFile,
        document_selector: vec![filter(FILE_SCHEME, None, Some(path_string(&path)))],
        working_directory: parent_or_self(&path),
        workspace_folder: None,
    })
}

/// Resolves documents to the scope of the session that must serve them
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    /// Working directory of the untitled session
    home_dir: PathBuf,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeResolver {
    /// Resolver using the user's home directory for untitled buffers
    pub fn new() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_home_dir(home_dir)
    }

    pub fn with_home_dir(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Resolve a document given its enclosing workspace folder, if any
    ///
    /// Returns `None` when no session should serve the document.
    pub fn resolve(
        &self,
        document: &DocumentRef,
        folder: Option<&WorkspaceFolder>,
    ) -> Option<ScopeDescriptor> {
        let input = RuleInput {
            document,
            folder,
            home_dir: &self.home_dir,
        };

        for (name, rule) in RULES {
            match rule(&input) {
                RuleOutcome::Continue => continue,
                RuleOutcome::Ignore => {
                    debug!("Ignoring {} (rule: {})", document.uri, name);
                    return None;
                }
                RuleOutcome::Resolved(descriptor) => {
                    debug!(
                        "Resolved {} to scope {} (rule: {})",
                        document.uri, descriptor.key, name
                    );
                    return Some(descriptor);
                }
            }
        }

        debug!("No scope rule matched {}", document.uri);
        None
    }

    /// Resolve a document, looking its folder up in the workspace
    pub fn resolve_in(
        &self,
        document: &DocumentRef,
        workspace: &dyn Workspace,
    ) -> Option<ScopeDescriptor> {
        let folder = workspace.folder_for(&document.uri);
        self.resolve(document, folder.as_ref())
    }
}
