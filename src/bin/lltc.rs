//! A small CLI for rendering a `.llt` template file against a JSON context.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use llt::value::{Dict, Value};
use llt::Engine;

/// Render an `.llt` template file against a JSON context.
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the `.llt` source file.
    #[arg(short, long)]
    source: PathBuf,

    /// Identifier of the template to render, if the source declares more than one.
    #[arg(short, long)]
    identifier: Option<String>,

    /// Path to a JSON file supplying the render context. Defaults to `{}`.
    #[arg(short, long)]
    context: Option<PathBuf>,

    /// Render as a messages template and print role-tagged JSON lines instead
    /// of plain text.
    #[arg(long)]
    messages: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let source = fs::read_to_string(&cli.source)
        .with_context(|| format!("reading template source {}", cli.source.display()))?;

    let context_json: serde_json::Value = match &cli.context {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading context file {}", path.display()))?;
            serde_json::from_str(&raw).context("parsing context JSON")?
        }
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    let root = json_to_value(context_json);

    let engine = Engine::new();
    let library = engine.parse(&source).context("parsing template source")?;

    let identifier = match &cli.identifier {
        Some(name) => name.clone(),
        None => {
            let descriptors = library.describe();
            match descriptors.as_slice() {
                [one] => one.identifier.clone().unwrap_or_default(),
                [] => bail!("source declares no templates"),
                _ => bail!("source declares multiple templates; pass --identifier"),
            }
        }
    };

    if cli.messages {
        let entries = engine
            .render_messages_by_id(&library, &identifier, root)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        for entry in entries {
            println!("{}", serde_json::json!({ "role": entry.role, "text": entry.text }));
        }
    } else {
        let text = engine
            .render_text_by_id(&library, &identifier, root)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        println!("{text}");
    }

    Ok(())
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (k, v) in map {
                dict.insert(k, json_to_value(v));
            }
            Value::Dict(dict)
        }
    }
}
