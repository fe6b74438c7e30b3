//! The analysis host: document lifecycle, background indexing and queries.
//!
//! A protocol layer drives this type with editor and file-system events and
//! forwards query results to the client. Everything runs on the caller's
//! thread; indexing proceeds in bounded batches so interactive requests can be
//! served in between.
//!
//! URIs coming from the editor are canonicalized before use, so they match
//! the keys of files indexed from disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use kemi_front::{
    BufferError, ChangeSummary, Document, DocumentStore, canonical_uri, path_to_uri, uri_to_path,
};
use lsp_types::{CompletionItem, Diagnostic, Hover, Location, Position, TextDocumentContentChangeEvent};

use crate::analysis::{
    AnalysisContext, Dispatcher, Query, RegistrationError, SemanticTokenEntry, WorkspaceView,
};
use crate::analyzers::{AnalyzerHandles, register_defaults};
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::indexer::{IndexQueue, WorkspaceEnumerator, is_script};

/// Version given to documents loaded from disk.
const DISK_VERSION: i32 = 0;

#[derive(Debug, Display, Error, From)]
pub enum HostError {
    #[display("{source}")]
    Buffer { source: BufferError },
    #[display("{source}")]
    Registration { source: RegistrationError },
}

/// A file-system notification for a workspace file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileEvent {
    Created,
    Changed,
    Deleted,
}

pub struct AnalysisHost {
    config: Config,
    store: DocumentStore,
    dispatcher: Dispatcher,
    handles: AnalyzerHandles,
    /// Config roots followed by workspace roots; used for absolute imports.
    roots: Vec<PathBuf>,
    workspace_roots: Vec<PathBuf>,
    /// Documents the editor owns. Disk events never touch them.
    editor_open: HashSet<String>,
    debouncer: Debouncer,
    queue: IndexQueue,
    enumerator: WorkspaceEnumerator,
}

impl AnalysisHost {
    pub fn new(config: Config) -> Result<Self, HostError> {
        let mut dispatcher = Dispatcher::new();
        let handles = register_defaults(&mut dispatcher, &config)?;
        Ok(Self {
            roots: config.roots.clone(),
            workspace_roots: Vec::new(),
            store: DocumentStore::new(),
            dispatcher,
            handles,
            editor_open: HashSet::new(),
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
            queue: IndexQueue::new(config.index_batch_size),
            enumerator: WorkspaceEnumerator::new(&config.excluded_dirs),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handles(&self) -> &AnalyzerHandles {
        &self.handles
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.store
    }

    pub fn document(&self, uri: &str) -> Option<Document> {
        self.store.get(&canonical_uri(uri))
    }

    /// Add a workspace root, both for import resolution and indexing.
    pub fn add_root(&mut self, root: &Path) {
        let root = root.to_path_buf();
        if self.workspace_roots.contains(&root) {
            return;
        }
        tracing::info!(root = %root.display(), "Workspace root added");
        self.workspace_roots.push(root);
        self.roots = self
            .config
            .roots
            .iter()
            .chain(&self.workspace_roots)
            .cloned()
            .collect();
    }

    /// Queue every script under the workspace roots. Returns how many were new.
    pub fn enqueue_roots(&mut self) -> usize {
        let scripts: Vec<PathBuf> = self
            .workspace_roots
            .iter()
            .flat_map(|root| self.enumerator.scripts(root))
            .collect();
        let added = self.queue.extend(scripts);
        tracing::info!(added, pending = self.queue.len(), "Workspace indexing queued");
        added
    }

    /// Queue specific files or directories, outside the workspace roots.
    pub fn enqueue_paths(&mut self, paths: &[PathBuf]) -> usize {
        let scripts: Vec<PathBuf> = paths
            .iter()
            .flat_map(|path| self.enumerator.scripts(path))
            .collect();
        self.queue.extend(scripts)
    }

    pub fn pending_index_len(&self) -> usize {
        self.queue.len()
    }

    /// Index up to one batch of queued files. Returns how many were indexed.
    pub fn index_next_batch(&mut self) -> usize {
        let batch = self.queue.next_batch();
        let mut indexed = 0;
        for path in batch {
            let uri = path_to_uri(&path);
            if self.editor_open.contains(&uri) {
                continue;
            }
            if self.load_from_disk(&path, &uri) {
                indexed += 1;
            }
        }
        tracing::debug!(indexed, pending = self.queue.len(), "Indexed batch");
        indexed
    }

    /// Drain the queue, calling `yield_hook` between batches.
    pub fn index_all(&mut self, mut yield_hook: impl FnMut(&mut Self)) -> usize {
        let mut total = 0;
        while !self.queue.is_empty() {
            total += self.index_next_batch();
            if !self.queue.is_empty() {
                yield_hook(self);
            }
        }
        tracing::info!(total, "Workspace indexing finished");
        total
    }

    pub fn did_open(&mut self, uri: &str, text: &str, version: i32) -> Result<(), HostError> {
        let uri = &canonical_uri(uri);
        tracing::info!(uri, version, "Document opened");
        let document = self.store.open(uri, text, version)?;
        self.editor_open.insert(uri.to_string());
        self.analyze(&document, None);
        self.debouncer.schedule(uri, Instant::now());
        Ok(())
    }

    pub fn did_change(
        &mut self,
        uri: &str,
        changes: &[TextDocumentContentChangeEvent],
        version: i32,
    ) -> Result<(), HostError> {
        self.did_change_at(uri, changes, version, Instant::now())
    }

    /// [`Self::did_change`] with an explicit clock, for debounce-driven callers.
    pub fn did_change_at(
        &mut self,
        uri: &str,
        changes: &[TextDocumentContentChangeEvent],
        version: i32,
        now: Instant,
    ) -> Result<(), HostError> {
        let uri = &canonical_uri(uri);
        let (document, summary) = self.store.change(uri, changes, version)?;
        self.analyze(&document, Some(&summary));
        self.debouncer.schedule(uri, now);
        Ok(())
    }

    /// The editor let go of `uri`. A file still on disk is reloaded from there.
    pub fn did_close(&mut self, uri: &str) {
        let uri = &canonical_uri(uri);
        tracing::info!(uri, "Document closed");
        self.editor_open.remove(uri);
        self.debouncer.cancel(uri);
        match uri_to_path(uri) {
            Some(path) if path.is_file() => {
                self.load_from_disk(&path, uri);
            }
            _ => self.remove(uri),
        }
    }

    pub fn file_event(&mut self, path: &Path, event: FileEvent) {
        if !is_script(path) {
            return;
        }
        let uri = path_to_uri(path);
        if self.editor_open.contains(&uri) {
            tracing::debug!(uri, ?event, "Ignoring disk event for open document");
            return;
        }
        match event {
            FileEvent::Created | FileEvent::Changed => {
                self.load_from_disk(path, &uri);
            }
            FileEvent::Deleted => self.remove(&uri),
        }
    }

    /// Documents whose diagnostics should be published now.
    pub fn take_due_diagnostics(&mut self, now: Instant) -> Vec<String> {
        self.debouncer.take_due(now)
    }

    pub fn next_diagnostics_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        match self.store.get(&canonical_uri(uri)) {
            Some(document) => self.dispatcher.diagnostics(&document),
            None => Vec::new(),
        }
    }

    pub fn definitions(&self, uri: &str, position: Position) -> Vec<Location> {
        self.query(uri, position, |dispatcher, query| dispatcher.definitions(query))
            .unwrap_or_default()
    }

    pub fn references(&self, uri: &str, position: Position) -> Vec<Location> {
        self.query(uri, position, |dispatcher, query| dispatcher.references(query))
            .unwrap_or_default()
    }

    pub fn hover(&self, uri: &str, position: Position) -> Option<Hover> {
        self.query(uri, position, |dispatcher, query| dispatcher.hover(query))
            .flatten()
    }

    pub fn completions(&self, uri: &str, position: Position) -> Vec<CompletionItem> {
        self.query(uri, position, |dispatcher, query| dispatcher.completions(query))
            .unwrap_or_default()
    }

    pub fn semantic_tokens(&self, uri: &str) -> Vec<SemanticTokenEntry> {
        match self.store.get(&canonical_uri(uri)) {
            Some(document) => self.dispatcher.semantic_tokens(&document),
            None => Vec::new(),
        }
    }

    fn query<T>(
        &self,
        uri: &str,
        position: Position,
        f: impl FnOnce(&Dispatcher, &Query<'_>) -> T,
    ) -> Option<T> {
        let document = self.store.get(&canonical_uri(uri))?;
        let source = document.source();
        let offset = document.offset_at(position);
        Some(f(
            &self.dispatcher,
            &Query {
                document: &document,
                source: &source,
                offset,
            },
        ))
    }

    fn load_from_disk(&mut self, path: &Path, uri: &str) -> bool {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Skipping unreadable file");
                return false;
            }
        };
        match self.store.open(uri, &text, DISK_VERSION) {
            Ok(document) => {
                self.analyze(&document, None);
                true
            }
            Err(error) => {
                tracing::warn!(uri, %error, "Skipping unparsable file");
                false
            }
        }
    }

    fn analyze(&mut self, document: &Document, changes: Option<&ChangeSummary>) {
        let source = document.source();
        let failed = self.dispatcher.analyze(&AnalysisContext {
            document,
            source: &source,
            changes,
            workspace: WorkspaceView {
                documents: &self.store,
                roots: &self.roots,
            },
        });
        if !failed.is_empty() {
            tracing::warn!(uri = document.uri(), ?failed, "Analysis incomplete");
        }
    }

    fn remove(&mut self, uri: &str) {
        if !self.store.close(uri) {
            return;
        }
        tracing::debug!(uri, "Document removed");
        self.dispatcher.document_removed(
            uri,
            WorkspaceView {
                documents: &self.store,
                roots: &self.roots,
            },
        );
    }
}
