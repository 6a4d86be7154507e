//! The two parallel template ASTs: text templates emit a string, messages
//! templates emit a sequence of role-tagged messages (§3).

use crate::expr::Expr;

/// Whether a `VarAssign` creates a fresh binding or rebinds an existing one (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    Create,
    Rebind,
}

/// A node in a text-template body. Variants are either renderable (produce
/// output) or non-renderable (`VarAssign`); the sequential renderer treats
/// non-renderable children specially when stitching newlines (§4.4).
#[derive(Debug, Clone)]
pub enum TextNode {
    Plain(String),
    Expr(Expr, Option<String>),
    IfElse(Expr, Box<TextNode>, Option<Box<TextNode>>),
    Foreach(Expr, Box<TextNode>, String),
    Render(Expr, Option<Expr>),
    VarAssign(String, Expr, AssignMode),
    Sequential(Vec<TextNode>),
}

impl TextNode {
    pub fn is_renderable(&self) -> bool {
        !matches!(self, TextNode::VarAssign(..))
    }
}

/// One `{role, text}` pair produced by rendering a messages template (§3, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntry {
    pub role: String,
    pub text: String,
}

/// A node in a messages-template body (§3).
#[derive(Debug, Clone)]
pub enum MessagesNode {
    Entry(Expr, TextNode),
    IfElse(Expr, Box<MessagesNode>, Option<Box<MessagesNode>>),
    Foreach(Expr, Box<MessagesNode>, String),
    Render(Expr, Option<Expr>),
    VarAssign(String, Expr, AssignMode),
    Sequential(Vec<MessagesNode>),
}

impl MessagesNode {
    pub fn is_renderable(&self) -> bool {
        !matches!(self, MessagesNode::VarAssign(..))
    }
}
