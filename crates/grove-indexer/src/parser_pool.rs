//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not `Sync`, so each worker thread owns one parser
//! and requests are fed to the workers over a channel. Trees and texts are
//! `Send` and travel back to the caller.

use crate::cst::{Cst, TextEdit};
use crate::error::SyntaxError;
use grove_core::Language;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tree_sitter::{Parser, Tree};

/// Grammar for a file. TypeScript picks the TSX dialect by extension.
pub fn grammar_for(language: Language, path: &Path) -> Result<tree_sitter::Language, SyntaxError> {
    let grammar = match language {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => {
            if path.extension().is_some_and(|e| e == "tsx") {
                tree_sitter_typescript::LANGUAGE_TSX.into()
            } else {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
        }
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::Other => return Err(SyntaxError::UnsupportedLanguage(language)),
    };
    Ok(grammar)
}

/// A parsing request sent to the parser pool
#[derive(Debug)]
pub struct ParseRequest {
    pub language: Language,
    pub path: PathBuf,
    pub text: Arc<str>,
    /// Previous tree, already adjusted with `Tree::edit`, for incremental parsing.
    pub old_tree: Option<Tree>,
}

/// Internal message for the parser worker
struct WorkerRequest {
    request: ParseRequest,
    response_sender: Sender<Result<Cst, SyntaxError>>,
}

/// Thread-safe parser pool
#[derive(Clone)]
pub struct ParserPool {
    sender: Sender<WorkerRequest>,
    workers: usize,
}

impl std::fmt::Debug for ParserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserPool").field("workers", &self.workers).finish()
    }
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = mpsc::channel::<WorkerRequest>();
        let receiver = Arc::new(Mutex::new(receiver));

        for i in 0..num_workers {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self {
            sender,
            workers: num_workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Worker thread function that processes parsing requests
    fn worker_thread(worker_id: usize, receiver: Arc<Mutex<Receiver<WorkerRequest>>>) {
        tracing::debug!("Parser worker {} started", worker_id);

        let mut parser = Parser::new();

        loop {
            let next = receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let WorkerRequest {
                request,
                response_sender,
            } = match next {
                Ok(req) => req,
                Err(_) => {
                    tracing::debug!("Parser worker {} shutting down", worker_id);
                    break;
                }
            };

            let result = Self::run(&mut parser, request);
            if response_sender.send(result).is_err() {
                tracing::warn!("Failed to send parse result back to caller");
            }
        }
    }

    fn run(parser: &mut Parser, request: ParseRequest) -> Result<Cst, SyntaxError> {
        let grammar = grammar_for(request.language, &request.path)?;
        parser
            .set_language(&grammar)
            .map_err(|e| SyntaxError::Grammar(e.to_string()))?;

        match parser.parse(request.text.as_bytes(), request.old_tree.as_ref()) {
            Some(tree) => Ok(Cst::new(tree, request.text, request.language)),
            None => {
                parser.reset();
                Err(SyntaxError::Cancelled(request.path.display().to_string()))
            }
        }
    }

    /// Parse content synchronously using the parser pool
    /// Note: This blocks the current thread until parsing is complete
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<Cst, SyntaxError> {
        let (response_sender, response_receiver) = mpsc::channel();

        let worker_request = WorkerRequest {
            request,
            response_sender,
        };

        self.sender
            .send(worker_request)
            .map_err(|_| SyntaxError::PoolClosed)?;

        response_receiver.recv().map_err(|_| SyntaxError::PoolClosed)?
    }

    /// Parse content asynchronously using the parser pool
    pub async fn parse(&self, request: ParseRequest) -> Result<Cst, SyntaxError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.parse_blocking(request))
            .await
            .map_err(|e| SyntaxError::Join(e.to_string()))?
    }

    /// Full parse of a file. Unparseable content still yields a tree, with
    /// `ERROR` nodes covering the regions the grammar could not match.
    pub fn parse_file(
        &self,
        path: &Path,
        language: Language,
        text: Arc<str>,
    ) -> Result<Cst, SyntaxError> {
        self.parse_blocking(ParseRequest {
            language,
            path: path.to_path_buf(),
            text,
            old_tree: None,
        })
    }

    /// Reparse after one edit, reusing the unchanged parts of `old`.
    /// Without an edit description the file is parsed from scratch.
    pub fn reparse(
        &self,
        path: &Path,
        old: &Cst,
        edit: Option<TextEdit>,
        text: Arc<str>,
    ) -> Result<Cst, SyntaxError> {
        let old_tree = edit.map(|edit| {
            let mut tree = old.tree().clone();
            tree.edit(&edit.input_edit(old.text(), &text));
            tree
        });
        self.parse_blocking(ParseRequest {
            language: old.language(),
            path: path.to_path_buf(),
            text,
            old_tree,
        })
    }
}
