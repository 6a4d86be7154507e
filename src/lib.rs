//! # llt - a prompt/chat templating engine
//!
//! `llt` compiles a Razor-like template source language into an abstract syntax
//! tree and renders it against a caller-supplied context, producing either a
//! formatted plain-text string or an ordered sequence of role-tagged chat
//! messages. It uses a pipeline approach:
//!
//! 1. **Parsing**: `.llt` source is parsed into text-template or messages-template
//!    ASTs, each top-level template registering itself in a per-parse library.
//! 2. **Refinement**: a post-parse pass strips authorial indentation and elides
//!    the blank lines a comment-only source line would otherwise leave behind.
//! 3. **Rendering**: a tree-walking evaluator renders the refined AST against a
//!    [`ContextAccessor`], sequentially stitching newlines across non-renderable
//!    nodes (variable bindings) so the output reads as if they were never there.
//! 4. **Retrieval**: a [`TemplateLibrary`] resolves a caller's metadata
//!    constraints (identifier, language, target model) to the most specific
//!    matching template, with optional per-type fallback.
//!
//! ## Quick start
//!
//! ```ignore
//! use llt::Engine;
//! use llt::value::{Dict, Value};
//!
//! let engine = Engine::new();
//! let library = engine.parse("@template t { Hello, @ctx.name! }")?;
//! let mut ctx_data = Dict::new();
//! ctx_data.insert("name", Value::String("Andrew".into()));
//! let output = engine.render_text_by_id(&library, "t", Value::Dict(ctx_data))?;
//! assert_eq!(output, "Hello, Andrew!");
//! ```
//!
//! ## Modules
//!
//! - [`value`]: the dynamically typed value system and operator semantics
//! - [`expr`]: the expression AST and evaluator
//! - [`ast`]: the text-template and messages-template ASTs
//! - [`parser`]: the `pest`-based grammar and AST builder
//! - [`refine`]: the post-parse indentation/boundary/comment-line pass
//! - [`render`]: the tree-walking evaluator
//! - [`metadata`]: template metadata and the type-indexed multiset
//! - [`library`]: the template registry and retrieval algorithm
//! - [`functions`]: the bare-call function set
//! - [`error`]: parse-time and render-time error taxonomies

use std::sync::Arc;

pub mod ast;
pub mod error;
pub mod expr;
pub mod functions;
pub mod library;
pub mod metadata;
pub mod parser;
pub mod refine;
pub mod render;
pub mod value;

pub use crate::ast::{MessageEntry, MessagesNode, TextNode};
pub use crate::error::{ParseError, TemplateRuntimeError};
pub use crate::library::{shared_library, LibraryError, Template, TemplateBody, TemplateLibrary};
pub use crate::value::{ContextAccessor, Value};

/// Tunable resource bounds for a render (§5, §6: the engine's only configuration
/// surface, since there is no persisted state). Mirrors the shape of an
/// `EngineConfig`: a small `Clone + Default` struct of limits passed into the
/// evaluator rather than read from a file.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Bound on `ContextAccessor` frame-stack depth (§3 suggests 1000).
    pub max_frame_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_depth: crate::value::MAX_FRAME_DEPTH,
        }
    }
}

/// A small facade over parsing and rendering, analogous to a `TemplateEngine`:
/// holds no state of its own beyond the configured [`Limits`], and every
/// operation is otherwise free (templates and libraries are independently
/// `Send + Sync`-shareable, §5).
#[derive(Debug, Clone, Default)]
pub struct Engine {
    limits: Limits,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self { limits }
    }

    /// Parses `.llt` source into a fresh library of its top-level templates (§4.2).
    pub fn parse(&self, source: &str) -> Result<Arc<TemplateLibrary>, ParseError> {
        parser::parse_source(source)
    }

    fn context_for(
        &self,
        root: Value,
        template: &Template,
        library: Arc<TemplateLibrary>,
    ) -> ContextAccessor {
        ContextAccessor::new(
            root,
            Arc::new(template.metadata.clone()),
            Arc::new(functions::TemplateFunctionSet::default()),
            library,
        )
        .with_max_frame_depth(self.limits.max_frame_depth)
    }

    /// Retrieves the text template named `identifier` from `library` and renders
    /// it against `root` (§4.5 `Render`, identifier-first convenience, §4.7).
    pub fn render_text_by_id(
        &self,
        library: &Arc<TemplateLibrary>,
        identifier: &str,
        root: Value,
    ) -> Result<String, RenderError> {
        let template = library
            .retrieve_by_id(identifier, &[], false, false)
            .map_err(RenderError::Library)?;
        let body = match &template.body {
            TemplateBody::Prompt(body) => body,
            TemplateBody::Plaintext(content) => return Ok(content.clone()),
            TemplateBody::Messages(_) => {
                return Err(RenderError::KindMismatch {
                    expected: "text",
                    actual: "messages",
                })
            }
        };
        let mut ctx = self.context_for(root, &template, library.clone());
        render::render_text(body, &mut ctx).map_err(RenderError::Runtime)
    }

    /// Retrieves the messages template named `identifier` and renders it (§4.6).
    pub fn render_messages_by_id(
        &self,
        library: &Arc<TemplateLibrary>,
        identifier: &str,
        root: Value,
    ) -> Result<Vec<MessageEntry>, RenderError> {
        let template = library
            .retrieve_by_id(identifier, &[], false, false)
            .map_err(RenderError::Library)?;
        let body = match &template.body {
            TemplateBody::Messages(body) => body,
            TemplateBody::Prompt(_) | TemplateBody::Plaintext(_) => {
                return Err(RenderError::KindMismatch {
                    expected: "messages",
                    actual: "text",
                })
            }
        };
        let mut ctx = self.context_for(root, &template, library.clone());
        render::render_messages(body, &mut ctx).map_err(RenderError::Runtime)
    }
}

/// The error surface of [`Engine`]'s convenience methods: either the template
/// could not be found, it was the wrong kind, or rendering it failed (§7).
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("template kind mismatch: expected {expected}, found {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Runtime(#[from] TemplateRuntimeError),
}
