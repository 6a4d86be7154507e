//! The tree-walking evaluator (§4.4-§4.6): text-template and messages-template
//! rendering, sequential newline stitching, and `@render` template lookup.

use std::sync::Arc;

use crate::ast::{AssignMode, MessageEntry, MessagesNode, TextNode};
use crate::error::TemplateRuntimeError as RtErr;
use crate::expr::Expr;
use crate::library::{shared_library, Template, TemplateBody, TemplateLibrary};
use crate::value::{ContextAccessor, Value};

pub fn render_text(node: &TextNode, ctx: &mut ContextAccessor) -> Result<String, RtErr> {
    match node {
        TextNode::Plain(s) => Ok(s.clone()),
        TextNode::Expr(expr, format) => {
            let v = expr.evaluate(ctx)?;
            v.to_string_with_format(format.as_deref())
        }
        TextNode::IfElse(cond, then_branch, else_branch) => {
            let take_then = cond.evaluate(ctx)?.as_bool();
            ctx.push_frame()?;
            let result = if take_then {
                render_text(then_branch, ctx)
            } else if let Some(e) = else_branch {
                render_text(e, ctx)
            } else {
                Ok(String::new())
            };
            ctx.pop_frame()?;
            result
        }
        TextNode::Foreach(iter_expr, body, var) => {
            let elements = iter_expr.evaluate(ctx)?.iter_elements()?;
            ctx.push_frame()?;
            let mut acc = String::new();
            let mut failure = None;
            for element in elements {
                ctx.declare(var, element);
                match render_text(body, ctx) {
                    Ok(piece) => join_iteration(&mut acc, &piece),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            ctx.pop_frame()?;
            match failure {
                Some(e) => Err(e),
                None => Ok(acc),
            }
        }
        TextNode::Render(name_expr, ctx_expr) => render_text_ref(name_expr, ctx_expr.as_ref(), ctx),
        TextNode::VarAssign(name, expr, mode) => {
            let v = expr.evaluate(ctx)?;
            match mode {
                AssignMode::Create => ctx.declare(name, v),
                AssignMode::Rebind => ctx.rebind(name, v)?,
            }
            Ok(String::new())
        }
        TextNode::Sequential(children) => render_sequential_text(children, ctx),
    }
}

/// Newline-stitching concatenation across a `Sequential` text node's children (§4.4).
///
/// A non-renderable node (`@let`, `@name = expr`) sandwiched between two `Plain`
/// siblings sits on its own source line, whose trailing and leading newlines
/// would otherwise double up around the vanished content. When such a node
/// renders empty right after a line break, the next piece's own leading break
/// is dropped so the two lines fuse into one rather than zero or two.
fn render_sequential_text(children: &[TextNode], ctx: &mut ContextAccessor) -> Result<String, RtErr> {
    let mut acc = String::new();
    let mut suppress_leading_newline = false;
    for child in children {
        let piece = render_text(child, ctx)?;
        if piece.is_empty() {
            if ends_with_newline(&acc) {
                suppress_leading_newline = true;
            }
            continue;
        }
        let piece = if suppress_leading_newline {
            drop_one_leading_newline(&piece)
        } else {
            piece
        };
        suppress_leading_newline = false;
        acc.push_str(&piece);
    }
    Ok(acc)
}

/// Appends one loop iteration's rendered output to the accumulator, separated
/// from the previous iteration by exactly one newline (§4.4's stitching rule
/// applied across iterations rather than across AST siblings: a body line
/// that already ends in `\n` gets none added, a body with no trailing break
/// of its own gets one inserted so iterations don't run together, and an
/// empty iteration contributes nothing).
fn join_iteration(acc: &mut String, piece: &str) {
    if piece.is_empty() {
        return;
    }
    if !acc.is_empty() && !acc.ends_with('\n') && !piece.starts_with('\n') {
        acc.push('\n');
    }
    acc.push_str(piece);
}

fn ends_with_newline(s: &str) -> bool {
    s.ends_with('\n')
}

fn drop_one_leading_newline(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("\r\n") {
        rest.to_string()
    } else if let Some(rest) = s.strip_prefix('\n') {
        rest.to_string()
    } else {
        s.to_string()
    }
}

pub fn render_messages(node: &MessagesNode, ctx: &mut ContextAccessor) -> Result<Vec<MessageEntry>, RtErr> {
    match node {
        MessagesNode::Entry(role_expr, body) => {
            let role = role_expr.evaluate(ctx)?.to_display_string()?;
            validate_role(&role)?;
            let text = render_text(body, ctx)?;
            Ok(vec![MessageEntry { role, text }])
        }
        MessagesNode::IfElse(cond, then_branch, else_branch) => {
            let take_then = cond.evaluate(ctx)?.as_bool();
            ctx.push_frame()?;
            let result = if take_then {
                render_messages(then_branch, ctx)
            } else if let Some(e) = else_branch {
                render_messages(e, ctx)
            } else {
                Ok(Vec::new())
            };
            ctx.pop_frame()?;
            result
        }
        MessagesNode::Foreach(iter_expr, body, var) => {
            let elements = iter_expr.evaluate(ctx)?.iter_elements()?;
            ctx.push_frame()?;
            let mut acc = Vec::new();
            let mut failure = None;
            for element in elements {
                ctx.declare(var, element);
                match render_messages(body, ctx) {
                    Ok(entries) => acc.extend(entries),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            ctx.pop_frame()?;
            match failure {
                Some(e) => Err(e),
                None => Ok(acc),
            }
        }
        MessagesNode::Render(name_expr, ctx_expr) => render_messages_ref(name_expr, ctx_expr.as_ref(), ctx),
        MessagesNode::VarAssign(name, expr, mode) => {
            let v = expr.evaluate(ctx)?;
            match mode {
                AssignMode::Create => ctx.declare(name, v),
                AssignMode::Rebind => ctx.rebind(name, v)?,
            }
            Ok(Vec::new())
        }
        MessagesNode::Sequential(children) => {
            let mut acc = Vec::new();
            for child in children {
                acc.extend(render_messages(child, ctx)?);
            }
            Ok(acc)
        }
    }
}

fn validate_role(role: &str) -> Result<(), RtErr> {
    match role {
        "system" | "user" | "assistant" => Ok(()),
        "tool" => Err(RtErr::ToolNotSupported),
        other => Err(RtErr::InvalidRole(other.to_string())),
    }
}

/// Looks up `name` in the current accessor's library, falling back to the
/// process-wide shared library (§4.5 `Render`).
fn find_template(name: &str, ctx: &ContextAccessor) -> Result<(Arc<Template>, Arc<TemplateLibrary>), RtErr> {
    let local = ctx.library_arc();
    if let Some(t) = local.try_retrieve_by_id(name, &[], false) {
        return Ok((t, local));
    }
    let shared = shared_library();
    if let Some(t) = shared.try_retrieve_by_id(name, &[], false) {
        return Ok((t, shared));
    }
    Err(RtErr::TemplateNotFound(name.to_string()))
}

fn render_text_ref(name_expr: &Expr, ctx_expr: Option<&Expr>, ctx: &mut ContextAccessor) -> Result<String, RtErr> {
    let name = name_expr.evaluate(ctx)?.to_display_string()?;
    let (template, lib) = find_template(&name, ctx)?;
    match &template.body {
        TemplateBody::Plaintext(content) => Ok(content.clone()),
        TemplateBody::Prompt(body) => match ctx_expr {
            None => render_text(body, ctx),
            Some(e) => {
                let root = e.evaluate(ctx)?;
                let mut fresh = ContextAccessor::new(root, Arc::new(template.metadata.clone()), ctx.functions_arc(), lib);
                render_text(body, &mut fresh)
            }
        },
        TemplateBody::Messages(_) => Err(RtErr::TemplateKindMismatch {
            expected: "text",
            actual: "messages",
        }),
    }
}

fn render_messages_ref(
    name_expr: &Expr,
    ctx_expr: Option<&Expr>,
    ctx: &mut ContextAccessor,
) -> Result<Vec<MessageEntry>, RtErr> {
    let name = name_expr.evaluate(ctx)?.to_display_string()?;
    let (template, lib) = find_template(&name, ctx)?;
    match &template.body {
        TemplateBody::Messages(body) => match ctx_expr {
            None => render_messages(body, ctx),
            Some(e) => {
                let root = e.evaluate(ctx)?;
                let mut fresh = ContextAccessor::new(root, Arc::new(template.metadata.clone()), ctx.functions_arc(), lib);
                render_messages(body, &mut fresh)
            }
        },
        TemplateBody::Prompt(_) | TemplateBody::Plaintext(_) => Err(RtErr::TemplateKindMismatch {
            expected: "messages",
            actual: "text",
        }),
    }
}
