//! Document scoping
//!
//! Decides which language server session a document belongs to. A session is
//! identified by a [`ScopeKey`]; documents resolving to the same key share one
//! server process.
//!
//! - **rules**: the ordered decision table producing a [`ScopeDescriptor`]
//! - **selector**: matching documents against a session's document selector
//! - **workspace**: workspace-folder membership and open-document tracking

pub mod rules;
pub mod selector;
pub mod workspace;

use lsp_types::DocumentFilter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

pub use rules::ScopeResolver;
pub use selector::selector_matches;
pub use workspace::{Workspace, WorkspaceState};

// ============================================================================
// Constants
// ============================================================================

pub const FILE_SCHEME: &str = "file";
pub const UNTITLED_SCHEME: &str = "untitled";

/// Schemes used for notebook cell documents; the first one is canonical
pub const NOTEBOOK_CELL_SCHEMES: [&str; 2] = ["vscode-notebook-cell", "notebook-cell"];

/// Language id of R sources
pub const R_LANGUAGE_ID: &str = "r";

/// Language id of R Markdown, the literate variant
pub const RMD_LANGUAGE_ID: &str = "rmd";

/// Key shared by every untitled buffer
pub const UNTITLED_SCOPE_KEY: &str = "untitled";

/// Prefix of notebook scope keys, followed by the notebook path
pub const NOTEBOOK_KEY_PREFIX: &str = "vscode-notebook:";

/// Whether a language id is served by the R language server
pub fn is_target_language(language_id: &str) -> bool {
    language_id == R_LANGUAGE_ID || language_id == RMD_LANGUAGE_ID
}

/// Filesystem path behind a URI
///
/// `file` URIs convert directly. Other hierarchical schemes (notebook cells)
/// reuse their path component as a file path. Opaque URIs such as
/// `untitled:Untitled-1` have no path.
pub fn uri_fs_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() == FILE_SCHEME {
        return uri.to_file_path().ok();
    }

    let path = uri.path();
    if !path.starts_with('/') {
        return None;
    }
    let mut as_file = Url::parse("file:///").ok()?;
    as_file.set_path(path);
    as_file.to_file_path().ok()
}

/// Path rendered the way selectors and keys embed it
fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Documents and folders
// ============================================================================

/// The parts of an editor document that scoping looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub uri: Url,
    pub language_id: String,
}

impl DocumentRef {
    pub fn new(uri: Url, language_id: impl Into<String>) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
        }
    }

    /// Parse a document URI
    pub fn parse(uri: &str, language_id: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(uri)?, language_id))
    }

    pub fn scheme(&self) -> &str {
        self.uri.scheme()
    }

    pub fn is_untitled(&self) -> bool {
        self.scheme() == UNTITLED_SCHEME
    }

    pub fn is_notebook_cell(&self) -> bool {
        NOTEBOOK_CELL_SCHEMES.contains(&self.scheme())
    }

    /// Filesystem path; for notebook cells this is the notebook's path
    pub fn fs_path(&self) -> Option<PathBuf> {
        uri_fs_path(&self.uri)
    }

    /// Whether both documents are cells of the same notebook
    pub fn same_notebook(&self, other: &DocumentRef) -> bool {
        self.is_notebook_cell()
            && other.scheme() == self.scheme()
            && other.fs_path().is_some()
            && other.fs_path() == self.fs_path()
    }
}

/// A workspace folder known to the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: Url,
    #[serde(default)]
    pub name: String,
}

impl WorkspaceFolder {
    pub fn new(uri: Url, name: impl Into<String>) -> Self {
        Self {
            uri,
            name: name.into(),
        }
    }

    /// Folder for a local directory, named after its last component
    pub fn from_path(path: &Path) -> Option<Self> {
        let uri = Url::from_file_path(path).ok()?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(Self { uri, name })
    }

    /// Local directory of the folder, without a trailing separator
    pub fn path(&self) -> Option<PathBuf> {
        let path = uri_fs_path(&self.uri)?;
        let trimmed = path_string(&path)
            .trim_end_matches(['/', '\\'])
            .to_string();
        if trimmed.is_empty() {
            Some(path)
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

// ============================================================================
// Scope keys and descriptors
// ============================================================================

/// Identity of one logical language server session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// The key shared by all untitled buffers
    pub fn untitled() -> Self {
        Self(UNTITLED_SCOPE_KEY.to_string())
    }

    /// Key of a notebook, from the notebook's path
    pub fn notebook(path: &Path) -> Self {
        Self(format!("{NOTEBOOK_KEY_PREFIX}{}", path_string(path)))
    }

    /// Key from the canonical string form of a URI
    pub fn from_uri(uri: &Url) -> Self {
        Self(uri.to_string())
    }

    pub fn for_folder(folder: &WorkspaceFolder) -> Self {
        Self::from_uri(&folder.uri)
    }

    /// Key used when a document closes
    ///
    /// Untitled buffers map to the shared untitled key, notebook cells to their
    /// notebook, everything else to the document URI itself. Folder-scoped
    /// sessions are therefore only reclaimed by folder removal or deactivation.
    pub fn for_closed_document(document: &DocumentRef) -> Self {
        if document.is_untitled() {
            return Self::untitled();
        }
        if document.is_notebook_cell() {
            if let Some(path) = document.fs_path() {
                return Self::notebook(&path);
            }
        }
        Self::from_uri(&document.uri)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which rule produced a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeKind {
    /// All cells of one notebook
    Notebook,
    /// Everything inside one workspace folder
    WorkspaceFolder,
    /// Every untitled buffer in the process
    Untitled,
    /// A single file outside any workspace folder
    StrayFile,
}

/// Everything needed to create the session serving a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDescriptor {
    pub key: ScopeKey,
    pub kind: ScopeKind,
    pub document_selector: Vec<DocumentFilter>,
    pub working_directory: PathBuf,
    pub workspace_folder: Option<WorkspaceFolder>,
}
