//! The post-parse refinement pass (§4.3): indentation stripping, boundary
//! trimming, and comment-line newline collapse. Runs once per top-level
//! template body and is the sole source of deterministic output formatting.

use crate::ast::{MessagesNode, TextNode};

const INDENT_WIDTH: usize = 4;

pub fn refine_text(root: TextNode) -> TextNode {
    refine_text_at(root, 0)
}

pub fn refine_messages(root: MessagesNode) -> MessagesNode {
    refine_messages_at(root, 0)
}

fn refine_text_at(node: TextNode, depth: usize) -> TextNode {
    match node {
        TextNode::Plain(text) => TextNode::Plain(strip_indentation(&text, depth)),
        TextNode::Expr(e, fmt) => TextNode::Expr(e, fmt),
        TextNode::IfElse(cond, then_branch, else_branch) => {
            let then_branch = Box::new(refine_text_at(*then_branch, depth + 1));
            let else_branch = else_branch.map(|e| Box::new(refine_else_branch_text(*e, depth)));
            TextNode::IfElse(cond, then_branch, else_branch)
        }
        TextNode::Foreach(iter, body, var) => {
            TextNode::Foreach(iter, Box::new(refine_text_at(*body, depth + 1)), var)
        }
        TextNode::Render(name, ctx) => TextNode::Render(name, ctx),
        TextNode::VarAssign(name, expr, mode) => TextNode::VarAssign(name, expr, mode),
        TextNode::Sequential(children) => {
            let mapped: Vec<TextNode> = children.into_iter().map(|c| refine_text_at(c, depth)).collect();
            TextNode::Sequential(finish_sequential(mapped))
        }
    }
}

/// An `else if` chain stays at its sibling `if`'s depth; a plain `else { … }`
/// block is a nested block like any other (§4.3).
fn refine_else_branch_text(node: TextNode, depth: usize) -> TextNode {
    match node {
        TextNode::IfElse(..) => refine_text_at(node, depth),
        other => refine_text_at(other, depth + 1),
    }
}

fn refine_messages_at(node: MessagesNode, depth: usize) -> MessagesNode {
    match node {
        MessagesNode::Entry(role, body) => MessagesNode::Entry(role, refine_text_at(body, depth + 1)),
        MessagesNode::IfElse(cond, then_branch, else_branch) => {
            let then_branch = Box::new(refine_messages_at(*then_branch, depth + 1));
            let else_branch = else_branch.map(|e| Box::new(refine_else_branch_messages(*e, depth)));
            MessagesNode::IfElse(cond, then_branch, else_branch)
        }
        MessagesNode::Foreach(iter, body, var) => {
            MessagesNode::Foreach(iter, Box::new(refine_messages_at(*body, depth + 1)), var)
        }
        MessagesNode::Render(name, ctx) => MessagesNode::Render(name, ctx),
        MessagesNode::VarAssign(name, expr, mode) => MessagesNode::VarAssign(name, expr, mode),
        MessagesNode::Sequential(children) => {
            MessagesNode::Sequential(children.into_iter().map(|c| refine_messages_at(c, depth)).collect())
        }
    }
}

fn refine_else_branch_messages(node: MessagesNode, depth: usize) -> MessagesNode {
    match node {
        MessagesNode::IfElse(..) => refine_messages_at(node, depth),
        other => refine_messages_at(other, depth + 1),
    }
}

/// Removes up to `depth * 4` leading indentation columns from every line (tabs
/// count as 4 columns); anything past that budget is kept verbatim (§4.3 item 1).
fn strip_indentation(text: &str, depth: usize) -> String {
    let budget = depth * INDENT_WIDTH;
    text.split('\n').map(|line| strip_leading_columns(line, budget)).collect::<Vec<_>>().join("\n")
}

fn strip_leading_columns(line: &str, budget: usize) -> String {
    let mut removed = 0;
    let mut byte_idx = 0;
    for c in line.chars() {
        if removed >= budget {
            break;
        }
        match c {
            ' ' => {
                removed += 1;
                byte_idx += c.len_utf8();
            }
            '\t' => {
                removed += INDENT_WIDTH;
                byte_idx += c.len_utf8();
            }
            _ => break,
        }
    }
    line[byte_idx..].to_string()
}

/// Boundary trimming + comment-newline collapse + merge (§4.3 items 2-3), applied
/// once to a fully-indentation-stripped child list of a `Sequential` block.
fn finish_sequential(mut children: Vec<TextNode>) -> Vec<TextNode> {
    if let Some(TextNode::Plain(text)) = children.first_mut() {
        *text = trim_leading_blank_line(text);
    }
    let last_has_preceding_sibling = children.len() > 1;
    if let Some(TextNode::Plain(text)) = children.last_mut() {
        *text = trim_trailing_blank_line(text, last_has_preceding_sibling);
    }
    double_newline_after_block(&mut children);
    collapse_comment_newlines(&mut children);
    merge_adjacent_plain(children)
}

/// Drops a blank first/last line left over from the grammar keeping every
/// byte between a block's braces (§4.3 item 2). When no whole line is blank,
/// still drops the bare leading run of spaces/tabs right after the opening
/// brace, since atomic matching no longer discards it at parse time.
fn trim_leading_blank_line(text: &str) -> String {
    if let Some(idx) = text.find('\n') {
        if text[..idx].trim().is_empty() {
            return text[idx + 1..].to_string();
        }
    }
    text.trim_start_matches([' ', '\t']).to_string()
}

/// Mirrors [`trim_leading_blank_line`] for the closing brace. A lone leading
/// `\n` (`idx == 0`) is only a true blank-first-line when this `Plain` is the
/// block's only child; when a sibling precedes it, that `\n` is the separator
/// between that sibling's (runtime) output and whatever follows the block, so
/// it must survive (e.g. a `@foreach` body's trailing newline between
/// iterations).
fn trim_trailing_blank_line(text: &str, has_preceding_sibling: bool) -> String {
    if let Some(idx) = text.rfind('\n') {
        if text[idx + 1..].trim().is_empty() && !(has_preceding_sibling && idx == 0) {
            return text[..idx].to_string();
        }
    }
    text.trim_end_matches([' ', '\t']).to_string()
}

/// A non-empty `@if`/`@else` or `@foreach` block followed by a `Plain` that
/// itself starts a new line doubles that leading newline into a blank line —
/// the blank line the block's own braces "inevitably create" around it, since
/// the braces themselves never contribute a `Plain` node of their own.
fn double_newline_after_block(children: &mut [TextNode]) {
    for i in 0..children.len().saturating_sub(1) {
        let is_block = matches!(children[i], TextNode::IfElse(..) | TextNode::Foreach(..));
        if !is_block {
            continue;
        }
        if let TextNode::Plain(text) = &mut children[i + 1] {
            if starts_with_ws_newline(text) {
                text.insert(0, '\n');
            }
        }
    }
}

fn ends_with_ws_newline(text: &str) -> bool {
    text.trim_end_matches([' ', '\t']).ends_with('\n')
}

fn starts_with_ws_newline(text: &str) -> bool {
    text.trim_start_matches([' ', '\t']).starts_with('\n')
}

fn strip_one_trailing_newline(text: &str) -> String {
    match text.rfind('\n') {
        Some(idx) => {
            let mut s = text.to_string();
            s.remove(idx);
            s
        }
        None => text.to_string(),
    }
}

fn collapse_comment_newlines(children: &mut [TextNode]) {
    for i in 0..children.len().saturating_sub(1) {
        let (left, right) = children.split_at_mut(i + 1);
        let should_collapse = match (&left[i], &right[0]) {
            (TextNode::Plain(l), TextNode::Plain(r)) => ends_with_ws_newline(l) && starts_with_ws_newline(r),
            _ => false,
        };
        if should_collapse {
            if let TextNode::Plain(l) = &mut left[i] {
                *l = strip_one_trailing_newline(l);
            }
        }
    }
}

fn merge_adjacent_plain(children: Vec<TextNode>) -> Vec<TextNode> {
    let mut out: Vec<TextNode> = Vec::with_capacity(children.len());
    for child in children {
        match (out.last_mut(), &child) {
            (Some(TextNode::Plain(prev)), TextNode::Plain(next)) => {
                prev.push_str(next);
            }
            _ => out.push(child),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::value::Value;

    #[test]
    fn strips_indentation_by_depth() {
        let refined = refine_text_at(TextNode::Plain("    hi\n        world".into()), 1);
        match refined {
            TextNode::Plain(s) => assert_eq!(s, "hi\n    world"),
            _ => panic!(),
        }
    }

    #[test]
    fn tabs_count_as_four_columns() {
        let refined = refine_text_at(TextNode::Plain("\thi".into()), 1);
        match refined {
            TextNode::Plain(s) => assert_eq!(s, "hi"),
            _ => panic!(),
        }
    }

    #[test]
    fn boundary_trim_drops_blank_first_and_last_lines() {
        let body = TextNode::Sequential(vec![
            TextNode::Plain("\nHello".into()),
            TextNode::Plain(" there\n".into()),
        ]);
        let refined = refine_text(body);
        match refined {
            TextNode::Sequential(children) => {
                assert_eq!(children.len(), 1);
                match &children[0] {
                    TextNode::Plain(s) => assert_eq!(s, "Hello there"),
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn comment_only_line_collapses_to_nothing() {
        // A comment consumed from between two plain-text lines leaves them
        // directly adjacent, each ending/starting with ws+newline; collapsing
        // drops one newline so the lines read as if the comment were never there.
        let body = TextNode::Sequential(vec![TextNode::Plain("first\n".into()), TextNode::Plain("\nsecond".into())]);
        let refined = refine_text(body);
        match refined {
            TextNode::Sequential(children) => {
                assert_eq!(children.len(), 1);
                match &children[0] {
                    TextNode::Plain(s) => assert_eq!(s, "first\nsecond"),
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn foreach_body_keeps_trailing_newline_as_iteration_separator() {
        // Mirrors a real `@foreach x in ctx { Item: @x\n}` body: the trailing
        // `Plain("\n")` is the block's only child's sole sibling (an `Expr`),
        // so it must survive boundary trimming rather than collapse to "".
        let body = TextNode::Sequential(vec![TextNode::Plain("Item: ".into()), TextNode::Expr(Expr::ContextRef, None), TextNode::Plain("\n".into())]);
        let refined = refine_text_at(body, 1);
        match refined {
            TextNode::Sequential(children) => {
                assert_eq!(children.len(), 3);
                match &children[2] {
                    TextNode::Plain(s) => assert_eq!(s, "\n"),
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn double_newline_follows_nonempty_if_else_block() {
        let then_branch = TextNode::Sequential(vec![TextNode::Plain("You are an adult.".into())]);
        let body = TextNode::Sequential(vec![
            TextNode::IfElse(Expr::Constant(Value::Bool(true)), Box::new(then_branch), None),
            TextNode::Plain("\nHave a nice day.".into()),
        ]);
        let refined = refine_text(body);
        match refined {
            TextNode::Sequential(children) => match &children[1] {
                TextNode::Plain(s) => assert_eq!(s, "\n\nHave a nice day."),
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn real_parsed_if_else_template_produces_blank_line_before_trailing_text() {
        let library = crate::parser::parse_source(
            "@template g { Greetings, @name!\n@if age > 18 { You are an adult. } else { You are too young! }\nHave a nice day. }",
        )
        .unwrap();
        let template = library.try_retrieve_single(&[], false).unwrap();
        let body = match &template.body {
            crate::library::TemplateBody::Prompt(b) => b,
            _ => panic!("expected a text template"),
        };
        match body {
            TextNode::Sequential(children) => {
                assert!(children.iter().any(|c| matches!(c, TextNode::IfElse(..))));
                let tail = children.iter().rev().find_map(|c| match c {
                    TextNode::Plain(s) if s.contains("Have a nice day") => Some(s.clone()),
                    _ => None,
                });
                assert_eq!(tail.as_deref(), Some("\n\nHave a nice day."));
            }
            _ => panic!(),
        }
    }
}
