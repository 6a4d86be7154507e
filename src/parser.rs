//! Turns `.llt` source text into compiled templates registered in a per-parse
//! [`TemplateLibrary`] (§4.2). Built on a `pest` grammar (`llt.pest`) plus a
//! precedence-climbing walk over the expression sub-grammar.

use std::sync::Arc;

use pest::Parser;

use crate::ast::{AssignMode, MessagesNode, TextNode};
use crate::error::{ParseError, Position};
use crate::expr::{BinaryKind, Expr, UnaryKind};
use crate::library::{Template, TemplateBody, TemplateLibrary};
use crate::metadata::{LanguageCode, MetadataCollection, MetadataValue};
use crate::refine;
use crate::value::Value;

#[derive(pest_derive::Parser)]
#[grammar = "llt.pest"]
struct LltGrammar;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

fn grammar_err(message: impl Into<String>) -> ParseError {
    ParseError::Grammar {
        pos: Position::default(),
        message: message.into(),
    }
}

fn convert_pest_error(e: pest::error::Error<Rule>) -> ParseError {
    grammar_err(e.to_string())
}

/// Parses `source` and returns a fresh library holding every top-level template
/// it declared (§4.2: "each registers itself in the per-parse library").
pub fn parse_source(source: &str) -> Result<Arc<TemplateLibrary>, ParseError> {
    tracing::debug!(bytes = source.len(), "parsing template source");
    let mut pairs = LltGrammar::parse(Rule::file, source).map_err(convert_pest_error)?;
    let file_pair = pairs.next().ok_or_else(|| grammar_err("empty parse"))?;
    let library = Arc::new(TemplateLibrary::new());
    for pair in file_pair.into_inner() {
        if pair.as_rule() == Rule::template_decl {
            let template = build_template_decl(pair)?;
            library
                .add(template)
                .map_err(|_| grammar_err("duplicate template metadata within source"))?;
        }
    }
    Ok(library)
}

fn build_template_decl(pair: Pair) -> Result<Template, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty template declaration"))?;
    match inner.as_rule() {
        Rule::text_template_decl => build_text_template(inner),
        Rule::messages_template_decl => build_messages_template(inner),
        other => Err(grammar_err(format!("unexpected rule in template_decl: {other:?}"))),
    }
}

fn build_text_template(pair: Pair) -> Result<Template, ParseError> {
    let mut metadata = MetadataCollection::new();
    let mut stmts = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => metadata.insert(MetadataValue::Identifier(p.as_str().to_string())),
            Rule::text_body => {
                for q in p.into_inner() {
                    match q.as_rule() {
                        Rule::metadata_block => metadata = build_metadata_block(q, metadata)?,
                        Rule::text_stmt => {
                            if let Some(node) = build_text_stmt(q)? {
                                stmts.push(node);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    let body = refine::refine_text(TextNode::Sequential(stmts));
    Ok(Template::new(TemplateBody::Prompt(body), metadata))
}

fn build_messages_template(pair: Pair) -> Result<Template, ParseError> {
    let mut metadata = MetadataCollection::new();
    let mut stmts = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => metadata.insert(MetadataValue::Identifier(p.as_str().to_string())),
            Rule::metadata_block => metadata = build_metadata_block(p, metadata)?,
            Rule::message_stmt => stmts.push(build_message_stmt(p)?),
            _ => {}
        }
    }
    let body = refine::refine_messages(MessagesNode::Sequential(stmts));
    Ok(Template::new(TemplateBody::Messages(body), metadata))
}

fn build_metadata_block(pair: Pair, mut collection: MetadataCollection) -> Result<MetadataCollection, ParseError> {
    for entry in pair.into_inner() {
        let mut parts = entry.into_inner();
        let key = parts.next().ok_or_else(|| grammar_err("metadata entry missing key"))?.as_str();
        let const_pair = parts.next().ok_or_else(|| grammar_err("metadata entry missing value"))?;
        if let Expr::Constant(v) = build_constant(const_pair)? {
            let s = v.to_display_string().unwrap_or_default();
            match key {
                "lang" => collection.insert(MetadataValue::Language(LanguageCode::new(s))),
                "model" => collection.insert(MetadataValue::TargetModel(s)),
                "model_family" => collection.insert(MetadataValue::TargetModelFamily(s)),
                _ => {} // unknown metadata keys are ignored (§4.2)
            }
        }
    }
    Ok(collection)
}

// ---- text statements ----
//
// `text_stmt` is matched inside an atomic `text_body`/`text_block` ancestor,
// so a source comment is surfaced as its own `comment_stmt` alternative
// rather than silently skipped; `build_text_stmt` drops it by returning
// `None`, which every call site filters out.

fn build_text_stmt(pair: Pair) -> Result<Option<TextNode>, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty text statement"))?;
    let node = match inner.as_rule() {
        Rule::if_stmt => build_if_stmt(inner)?,
        Rule::foreach_stmt => build_foreach_stmt(inner)?,
        Rule::render_stmt => build_render_stmt_text(inner)?,
        Rule::let_stmt => {
            let (name, expr) = let_parts(inner)?;
            TextNode::VarAssign(name, expr, AssignMode::Create)
        }
        Rule::assign_stmt => {
            let (name, expr) = let_parts(inner)?;
            TextNode::VarAssign(name, expr, AssignMode::Rebind)
        }
        Rule::output_stmt => build_output_stmt(inner)?,
        Rule::comment_stmt => return Ok(None),
        Rule::plain_text => TextNode::Plain(unescape_plain(inner.as_str())),
        other => return Err(grammar_err(format!("unexpected rule in text_stmt: {other:?}"))),
    };
    Ok(Some(node))
}

/// Unwraps a `text_block`/`message_block_tail` pair (`"{" ~ text_stmt* ~ "}"`,
/// matched atomically so line breaks inside survive) into its statement list.
fn build_text_block(pair: Pair) -> Result<Vec<TextNode>, ParseError> {
    let mut stmts = Vec::new();
    for p in pair.into_inner() {
        if p.as_rule() == Rule::text_stmt {
            if let Some(node) = build_text_stmt(p)? {
                stmts.push(node);
            }
        }
    }
    Ok(stmts)
}

fn build_if_stmt(pair: Pair) -> Result<TextNode, ParseError> {
    let mut inner = pair.into_inner();
    let cond = build_expr(inner.next().ok_or_else(|| grammar_err("if missing condition"))?)?;
    let mut then_stmts = Vec::new();
    let mut else_node = None;
    for p in inner {
        match p.as_rule() {
            Rule::text_block => then_stmts = build_text_block(p)?,
            Rule::else_clause => else_node = Some(build_else_clause(p)?),
            _ => {}
        }
    }
    Ok(TextNode::IfElse(
        cond,
        Box::new(TextNode::Sequential(then_stmts)),
        else_node.map(Box::new),
    ))
}

fn build_else_clause(pair: Pair) -> Result<TextNode, ParseError> {
    let p = pair.into_inner().next().ok_or_else(|| grammar_err("empty else clause"))?;
    match p.as_rule() {
        Rule::if_stmt => build_if_stmt(p),
        Rule::text_block => Ok(TextNode::Sequential(build_text_block(p)?)),
        other => Err(grammar_err(format!("unexpected rule in else_clause: {other:?}"))),
    }
}

fn build_foreach_stmt(pair: Pair) -> Result<TextNode, ParseError> {
    let mut inner = pair.into_inner();
    let var = inner.next().ok_or_else(|| grammar_err("foreach missing loop variable"))?.as_str().to_string();
    let iter_expr = build_expr(inner.next().ok_or_else(|| grammar_err("foreach missing iterable"))?)?;
    let block = inner.next().ok_or_else(|| grammar_err("foreach missing body"))?;
    let stmts = build_text_block(block)?;
    Ok(TextNode::Foreach(iter_expr, Box::new(TextNode::Sequential(stmts)), var))
}

fn build_render_stmt_text(pair: Pair) -> Result<TextNode, ParseError> {
    let mut inner = pair.into_inner();
    let name_expr = build_expr(inner.next().ok_or_else(|| grammar_err("render missing template name"))?)?;
    let ctx_expr = inner.next().map(build_expr).transpose()?;
    Ok(TextNode::Render(name_expr, ctx_expr))
}

fn build_output_stmt(pair: Pair) -> Result<TextNode, ParseError> {
    let mut inner = pair.into_inner();
    let expr = build_expr(inner.next().ok_or_else(|| grammar_err("empty output expression"))?)?;
    let format = inner.next().map(|p| p.as_str().to_string());
    Ok(TextNode::Expr(expr, format))
}

fn let_parts(pair: Pair) -> Result<(String, Expr), ParseError> {
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or_else(|| grammar_err("assignment missing name"))?.as_str().to_string();
    let expr = build_expr(inner.next().ok_or_else(|| grammar_err("assignment missing expression"))?)?;
    Ok((name, expr))
}

fn unescape_plain(s: &str) -> String {
    s.replace("@@", "@")
}

// ---- message statements ----

fn build_message_stmt(pair: Pair) -> Result<MessagesNode, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty message statement"))?;
    match inner.as_rule() {
        Rule::if_stmt_m => build_if_stmt_m(inner),
        Rule::foreach_stmt_m => build_foreach_stmt_m(inner),
        Rule::render_stmt => build_render_stmt_messages(inner),
        Rule::let_stmt => {
            let (name, expr) = let_parts(inner)?;
            Ok(MessagesNode::VarAssign(name, expr, AssignMode::Create))
        }
        Rule::assign_stmt => {
            let (name, expr) = let_parts(inner)?;
            Ok(MessagesNode::VarAssign(name, expr, AssignMode::Rebind))
        }
        Rule::role_message_stmt => build_role_message_stmt(inner),
        Rule::message_block_stmt => build_message_block_stmt(inner),
        other => Err(grammar_err(format!("unexpected rule in message_stmt: {other:?}"))),
    }
}

fn build_if_stmt_m(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut inner = pair.into_inner();
    let cond = build_expr(inner.next().ok_or_else(|| grammar_err("if missing condition"))?)?;
    let mut then_stmts = Vec::new();
    let mut else_node = None;
    for p in inner {
        match p.as_rule() {
            Rule::message_stmt => then_stmts.push(build_message_stmt(p)?),
            Rule::else_clause_m => else_node = Some(build_else_clause_m(p)?),
            _ => {}
        }
    }
    Ok(MessagesNode::IfElse(
        cond,
        Box::new(MessagesNode::Sequential(then_stmts)),
        else_node.map(Box::new),
    ))
}

fn build_else_clause_m(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut stmts = Vec::new();
    let mut chained_if = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::if_stmt_m => chained_if = Some(build_if_stmt_m(p)?),
            Rule::message_stmt => stmts.push(build_message_stmt(p)?),
            _ => {}
        }
    }
    Ok(chained_if.unwrap_or(MessagesNode::Sequential(stmts)))
}

fn build_foreach_stmt_m(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut inner = pair.into_inner();
    let var = inner.next().ok_or_else(|| grammar_err("foreach missing loop variable"))?.as_str().to_string();
    let iter_expr = build_expr(inner.next().ok_or_else(|| grammar_err("foreach missing iterable"))?)?;
    let stmts = inner.map(build_message_stmt).collect::<Result<Vec<_>, _>>()?;
    Ok(MessagesNode::Foreach(iter_expr, Box::new(MessagesNode::Sequential(stmts)), var))
}

fn build_render_stmt_messages(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut inner = pair.into_inner();
    let name_expr = build_expr(inner.next().ok_or_else(|| grammar_err("render missing template name"))?)?;
    let ctx_expr = inner.next().map(build_expr).transpose()?;
    Ok(MessagesNode::Render(name_expr, ctx_expr))
}

fn build_role_message_stmt(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut inner = pair.into_inner();
    let role = inner.next().ok_or_else(|| grammar_err("message missing role"))?.as_str().to_string();
    let block = inner.next().ok_or_else(|| grammar_err("message missing body"))?;
    let stmts = build_text_block(block)?;
    Ok(MessagesNode::Entry(Expr::Constant(Value::String(role)), TextNode::Sequential(stmts)))
}

fn build_message_block_stmt(pair: Pair) -> Result<MessagesNode, ParseError> {
    let mut inner = pair.into_inner();
    let role_expr = build_expr(inner.next().ok_or_else(|| grammar_err("message block missing role"))?)?;
    let tail = inner.next().ok_or_else(|| grammar_err("message block missing body"))?;
    let stmts = build_text_block(tail)?;
    Ok(MessagesNode::Entry(role_expr, TextNode::Sequential(stmts)))
}

// ---- expression grammar (§4.2 items 1-10), precedence encoded in the pest rules ----

fn build_expr(pair: Pair) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty expression"))?;
    build_ternary(inner)
}

fn build_ternary(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let cond = build_or(inner.next().ok_or_else(|| grammar_err("empty ternary"))?)?;
    match inner.next() {
        Some(then_pair) => {
            let then_e = build_expr(then_pair)?;
            let else_pair = inner.next().ok_or_else(|| grammar_err("ternary missing else branch"))?;
            let else_e = build_expr(else_pair)?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then_e), Box::new(else_e)))
        }
        None => Ok(cond),
    }
}

fn build_or(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_and(inner.next().ok_or_else(|| grammar_err("empty or-expression"))?)?;
    for next in inner {
        left = Expr::BinaryOp(BinaryKind::Or, Box::new(left), Box::new(build_and(next)?));
    }
    Ok(left)
}

fn build_and(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_eq(inner.next().ok_or_else(|| grammar_err("empty and-expression"))?)?;
    for next in inner {
        left = Expr::BinaryOp(BinaryKind::And, Box::new(left), Box::new(build_eq(next)?));
    }
    Ok(left)
}

fn build_eq(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_rel(inner.next().ok_or_else(|| grammar_err("empty equality expression"))?)?;
    loop {
        let Some(op_pair) = inner.next() else { break };
        let op = match op_pair.as_str() {
            "==" => BinaryKind::Eq,
            "!=" => BinaryKind::Ne,
            other => return Err(grammar_err(format!("unknown equality operator '{other}'"))),
        };
        let right_pair = inner.next().ok_or_else(|| grammar_err("equality missing right operand"))?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(build_rel(right_pair)?));
    }
    Ok(left)
}

fn build_rel(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_add(inner.next().ok_or_else(|| grammar_err("empty relational expression"))?)?;
    loop {
        let Some(op_pair) = inner.next() else { break };
        let op = match op_pair.as_str() {
            "<=" => BinaryKind::Le,
            ">=" => BinaryKind::Ge,
            "<" => BinaryKind::Lt,
            ">" => BinaryKind::Gt,
            other => return Err(grammar_err(format!("unknown relational operator '{other}'"))),
        };
        let right_pair = inner.next().ok_or_else(|| grammar_err("relational missing right operand"))?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(build_add(right_pair)?));
    }
    Ok(left)
}

fn build_add(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_mul(inner.next().ok_or_else(|| grammar_err("empty additive expression"))?)?;
    loop {
        let Some(op_pair) = inner.next() else { break };
        let op = match op_pair.as_str() {
            "+" => BinaryKind::Add,
            "-" => BinaryKind::Sub,
            other => return Err(grammar_err(format!("unknown additive operator '{other}'"))),
        };
        let right_pair = inner.next().ok_or_else(|| grammar_err("additive missing right operand"))?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(build_mul(right_pair)?));
    }
    Ok(left)
}

fn build_mul(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut left = build_unary(inner.next().ok_or_else(|| grammar_err("empty multiplicative expression"))?)?;
    loop {
        let Some(op_pair) = inner.next() else { break };
        let op = match op_pair.as_str() {
            "*" => BinaryKind::Mul,
            "/" => BinaryKind::Div,
            "%" => BinaryKind::Mod,
            other => return Err(grammar_err(format!("unknown multiplicative operator '{other}'"))),
        };
        let right_pair = inner.next().ok_or_else(|| grammar_err("multiplicative missing right operand"))?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(build_unary(right_pair)?));
    }
    Ok(left)
}

fn build_unary(pair: Pair) -> Result<Expr, ParseError> {
    let mut ops = Vec::new();
    let mut postfix_pair = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::unary_op => ops.push(p.as_str().to_string()),
            Rule::postfix_expr => postfix_pair = Some(p),
            _ => {}
        }
    }
    let postfix_pair = postfix_pair.ok_or_else(|| grammar_err("unary expression missing operand"))?;
    let mut expr = build_postfix(postfix_pair)?;
    for op in ops.into_iter().rev() {
        expr = match op.as_str() {
            "-" => Expr::UnaryOp(UnaryKind::Negate, Box::new(expr)),
            "!" => Expr::UnaryOp(UnaryKind::Not, Box::new(expr)),
            "+" => expr,
            other => return Err(grammar_err(format!("unknown unary operator '{other}'"))),
        };
    }
    Ok(expr)
}

fn build_postfix(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut expr = build_primary(inner.next().ok_or_else(|| grammar_err("postfix expression missing primary"))?)?;
    for op_pair in inner {
        let inner_op = op_pair
            .into_inner()
            .next()
            .ok_or_else(|| grammar_err("empty postfix operator"))?;
        expr = match inner_op.as_rule() {
            Rule::property_op => {
                let name = inner_op.into_inner().next().ok_or_else(|| grammar_err("property missing name"))?.as_str().to_string();
                Expr::Property(Box::new(expr), name)
            }
            Rule::call_op => {
                let mut parts = inner_op.into_inner();
                let name = parts.next().ok_or_else(|| grammar_err("call missing method name"))?.as_str().to_string();
                let args = match parts.next() {
                    Some(list) => build_arg_list(list)?,
                    None => Vec::new(),
                };
                Expr::MethodCall(Box::new(expr), name, args)
            }
            Rule::index_op => {
                let idx_pair = inner_op.into_inner().next().ok_or_else(|| grammar_err("index missing expression"))?;
                Expr::Index(Box::new(expr), Box::new(build_expr(idx_pair)?))
            }
            other => return Err(grammar_err(format!("unexpected postfix operator: {other:?}"))),
        };
    }
    Ok(expr)
}

fn build_primary(pair: Pair) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty primary expression"))?;
    match inner.as_rule() {
        Rule::constant => build_constant(inner),
        Rule::bare_call => build_bare_call(inner),
        Rule::ctx_kw => Ok(Expr::ContextRef),
        Rule::array_literal => build_array_literal(inner),
        Rule::dict_literal => build_dict_literal(inner),
        Rule::expr => build_expr(inner),
        Rule::ident => Ok(Expr::identifier(inner.as_str())),
        other => Err(grammar_err(format!("unexpected primary expression: {other:?}"))),
    }
}

fn build_constant(pair: Pair) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().ok_or_else(|| grammar_err("empty constant"))?;
    let value = match inner.as_rule() {
        Rule::number => Value::Number(
            inner
                .as_str()
                .parse::<f64>()
                .map_err(|_| grammar_err(format!("invalid number literal '{}'", inner.as_str())))?,
        ),
        Rule::string => Value::String(unescape_string(inner.as_str())),
        Rule::kw_true => Value::Bool(true),
        Rule::kw_false => Value::Bool(false),
        Rule::kw_null => Value::Null,
        other => return Err(grammar_err(format!("unexpected constant: {other:?}"))),
    };
    Ok(Expr::Constant(value))
}

fn unescape_string(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    inner.replace("''", "'")
}

fn build_bare_call(pair: Pair) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or_else(|| grammar_err("call missing function name"))?.as_str().to_string();
    let args = match inner.next() {
        Some(list) => build_arg_list(list)?,
        None => Vec::new(),
    };
    Ok(Expr::bare_call(name, args))
}

fn build_arg_list(pair: Pair) -> Result<Vec<Expr>, ParseError> {
    pair.into_inner().map(build_expr).collect()
}

fn build_array_literal(pair: Pair) -> Result<Expr, ParseError> {
    Ok(Expr::ArrayLiteral(pair.into_inner().map(build_expr).collect::<Result<Vec<_>, _>>()?))
}

fn build_dict_literal(pair: Pair) -> Result<Expr, ParseError> {
    let mut entries = Vec::new();
    for entry in pair.into_inner() {
        let mut parts = entry.into_inner();
        let key = parts.next().ok_or_else(|| grammar_err("dict entry missing key"))?.as_str().to_string();
        let value = build_expr(parts.next().ok_or_else(|| grammar_err("dict entry missing value"))?)?;
        entries.push((key, value));
    }
    Ok(Expr::DictLiteral(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::TemplateFunctionSet;
    use crate::value::{ContextAccessor, Dict};

    fn render(source: &str, root: Value) -> String {
        let library = parse_source(source).unwrap();
        let template = library.try_retrieve_single(&[], false).expect("one template expected");
        let body = match &template.body {
            TemplateBody::Prompt(b) => b.clone(),
            _ => panic!("expected a text template"),
        };
        let mut ctx = ContextAccessor::new(
            root,
            Arc::new(template.metadata.clone()),
            Arc::new(TemplateFunctionSet::default()),
            library,
        );
        crate::render::render_text(&body, &mut ctx).unwrap()
    }

    #[test]
    fn parses_hello_name_template() {
        let mut dict = Dict::new();
        dict.insert("name", Value::String("Andrew".into()));
        let out = render("@template t { Hello, @ctx.name!}", Value::Dict(dict));
        assert_eq!(out, "Hello, Andrew!");
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let out = render("@template t { @(2 + 3 * 4) }", Value::Null);
        assert_eq!(out.trim(), "14");
    }

    #[test]
    fn parses_if_else() {
        let mut dict = Dict::new();
        dict.insert("age", Value::Number(20.0));
        let source = "@template t { @if age > 18 { adult } else { young } }";
        assert_eq!(render(source, Value::Dict(dict)).trim(), "adult");
    }

    #[test]
    fn rejects_unterminated_block() {
        let result = parse_source("@template t { @if true { ");
        assert!(result.is_err());
    }
}
