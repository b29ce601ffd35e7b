//! Workspace folders and open documents as seen by the editor

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::scope::{DocumentRef, FILE_SCHEME, WorkspaceFolder, uri_fs_path};

/// Editor workspace queries used by scoping and lifecycle handling
pub trait Workspace: Send + Sync {
    /// The workspace folder enclosing a document, if any
    fn folder_for(&self, uri: &Url) -> Option<WorkspaceFolder>;

    /// Documents currently open in the editor
    fn open_documents(&self) -> Vec<DocumentRef>;
}

#[derive(Debug, Default)]
struct WorkspaceInner {
    folders: Vec<WorkspaceFolder>,
    /// Keyed by URI string so iteration order is stable
    documents: BTreeMap<String, DocumentRef>,
}

/// In-memory workspace fed by host events
#[derive(Debug, Default)]
pub struct WorkspaceState {
    inner: Mutex<WorkspaceInner>,
}

impl WorkspaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace with the given folders and no open documents
    pub fn with_folders(folders: impl IntoIterator<Item = WorkspaceFolder>) -> Self {
        let state = Self::new();
        for folder in folders {
            state.add_folder(folder);
        }
        state
    }

    pub fn add_folder(&self, folder: WorkspaceFolder) {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let mut inner = self.inner.lock().unwrap();
        if !inner.folders.iter().any(|known| known.uri == folder.uri) {
            debug!("Workspace folder added: {}", folder.uri);
            inner.folders.push(folder);
        }
    }

    /// Forget a folder; returns whether it was known
    pub fn remove_folder(&self, uri: &Url) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.folders.len();
        inner.folders.retain(|folder| &folder.uri != uri);
        let removed = inner.folders.len() != before;
        if removed {
            debug!("Workspace folder removed: {}", uri);
        }
        removed
    }

    pub fn folders(&self) -> Vec<WorkspaceFolder> {
        self.inner.lock().unwrap().folders.clone()
    }

    pub fn open_document(&self, document: DocumentRef) {
        self.inner
            .lock()
            .unwrap()
            .documents
            .insert(document.uri.to_string(), document);
    }

    /// Forget an open document, returning what was recorded for it
    pub fn close_document(&self, uri: &Url) -> Option<DocumentRef> {
        self.inner.lock().unwrap().documents.remove(uri.as_str())
    }
}

/// Whether `path` lies at or below `folder`
fn contains(folder: &Path, path: &Path) -> bool {
    path.starts_with(folder)
}

impl Workspace for WorkspaceState {
    /// Innermost folder containing a `file` URI
    ///
    /// Other schemes have no folder: untitled buffers are not on disk and
    /// notebook cells are scoped by their notebook.
    fn folder_for(&self, uri: &Url) -> Option<WorkspaceFolder> {
        if uri.scheme() != FILE_SCHEME {
            return None;
        }
        let path = uri_fs_path(uri)?;

        let inner = self.inner.lock().unwrap();
        inner
            .folders
            .iter()
            .filter_map(|folder| folder.path().map(|root| (root, folder)))
            .filter(|(root, _)| contains(root, &path))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, folder)| folder.clone())
    }

    fn open_documents(&self) -> Vec<DocumentRef> {
        self.inner
            .lock()
            .unwrap()
            .documents
            .values()
            .cloned()
            .collect()
    }
}
