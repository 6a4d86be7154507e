//! End-to-end scenarios exercising the engine through its public surface (§8).

use llt::value::{Dict, Value};
use llt::{library::TemplateBody, metadata::MetadataValue, Engine};

fn dict_of(pairs: Vec<(&str, Value)>) -> Value {
    let mut d = Dict::new();
    for (k, v) in pairs {
        d.insert(k, v);
    }
    Value::Dict(d)
}

#[test]
fn if_else_with_formatting() {
    let engine = Engine::new();
    let source = "@template g { Greetings, @name!\n@if age > 18 { You are an adult. } else { You are too young! }\nHave a nice day. }";
    let library = engine.parse(source).unwrap();

    let adult = engine
        .render_text_by_id(&library, "g", dict_of(vec![("name", Value::String("Andrew".into())), ("age", Value::Number(20.0))]))
        .unwrap();
    assert_eq!(adult, "Greetings, Andrew!\nYou are an adult.\n\nHave a nice day.");

    let minor = engine
        .render_text_by_id(&library, "g", dict_of(vec![("name", Value::String("Alice".into())), ("age", Value::Number(15.0))]))
        .unwrap();
    assert_eq!(minor, "Greetings, Alice!\nYou are too young!\n\nHave a nice day.");
}

#[test]
fn foreach_with_shadowing() {
    let engine = Engine::new();
    let source = "@template t { @foreach item in items { Outer: @item\n@let item = 'shadowed'\nInner: @item } }";
    let library = engine.parse(source).unwrap();
    let root = dict_of(vec![(
        "items",
        Value::Array(vec![Value::String("A".into()), Value::String("B".into())]),
    )]);
    let out = engine.render_text_by_id(&library, "t", root).unwrap();
    assert_eq!(out, "Outer: A\nInner: shadowed\nOuter: B\nInner: shadowed");
}

#[test]
fn metadata_specificity_picks_most_constrained_template() {
    let engine = Engine::new();
    let source = "\
@template greeting { base }
@template greeting { @metadata { lang: 'en' } english }
@template greeting { @metadata { lang: 'en', model: 'gpt-4' } english gpt4 }
@template greeting { @metadata { lang: 'ru' } russian }
";
    let library = engine.parse(source).unwrap();

    let gpt4 = library
        .retrieve_by_id(
            "greeting",
            &[
                MetadataValue::Language(llt::metadata::LanguageCode::new("en")),
                MetadataValue::TargetModel("gpt-4".into()),
            ],
            false,
            false,
        )
        .unwrap();
    assert!(matches!(&gpt4.body, TemplateBody::Prompt(_)));
    assert_eq!(gpt4.metadata.get_all(llt::metadata::MetadataKind::TargetModel).len(), 1);

    let en = library
        .retrieve_by_id("greeting", &[MetadataValue::Language(llt::metadata::LanguageCode::new("en"))], false, false)
        .unwrap();
    assert!(en.metadata.get_all(llt::metadata::MetadataKind::TargetModel).is_empty());

    let base = library.retrieve_by_id("greeting", &[], false, false).unwrap();
    assert!(base.metadata.get_all(llt::metadata::MetadataKind::Language).is_empty());
}

#[test]
fn language_fallback_picks_an_available_language() {
    let engine = Engine::new();
    let source = "@template greeting { @metadata { lang: 'en' } hi }";
    let library = engine.parse(source).unwrap();

    let result = library
        .retrieve_by_id(
            "greeting",
            &[MetadataValue::Language(llt::metadata::LanguageCode::new("fr"))],
            true,
            false,
        )
        .unwrap();
    assert_eq!(
        result.metadata.get_all(llt::metadata::MetadataKind::Language)[0],
        MetadataValue::Language(llt::metadata::LanguageCode::new("en"))
    );
}

#[test]
fn nested_render_composes_outer_and_inner() {
    let engine = Engine::new();
    let source = "\
@template outer { @render 'inner' }
@template inner { @foreach x in ctx { Item: @x\n} }
";
    let library = engine.parse(source).unwrap();
    let root = Value::Array(vec![Value::String("Apples".into()), Value::String("Bananas".into())]);
    let out = engine.render_text_by_id(&library, "outer", root).unwrap();
    assert_eq!(out, "Item: Apples\nItem: Bananas\n");
}

#[test]
fn messages_template_roundtrip() {
    let engine = Engine::new();
    let source = "\
@messages template t {
  @system message { You are a helpful assistant. }
  @foreach name in names { @message { @role 'user' Hello, i am @name! } }
}
";
    let library = engine.parse(source).unwrap();
    let root = dict_of(vec![(
        "names",
        Value::Array(vec![Value::String("Alex".into()), Value::String("Rob".into())]),
    )]);
    let entries = engine.render_messages_by_id(&library, "t", root).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].role, "system");
    assert_eq!(entries[1].role, "user");
    assert_eq!(entries[1].text, "Hello, i am Alex!");
    assert_eq!(entries[2].text, "Hello, i am Rob!");
}

#[test]
fn describe_reports_every_declared_template() {
    let engine = Engine::new();
    let source = "\
@template a { @metadata { lang: 'en' } x }
@messages template b { @system message { y } }
";
    let library = engine.parse(source).unwrap();
    let descriptors = library.describe();
    assert_eq!(descriptors.len(), 2);
    assert!(descriptors.iter().any(|d| d.identifier.as_deref() == Some("a") && d.kind == "text"));
    assert!(descriptors.iter().any(|d| d.identifier.as_deref() == Some("b") && d.kind == "messages"));
}

#[test]
fn variable_does_not_leak_past_foreach() {
    use llt::value::ContextAccessor;
    let engine = Engine::new();
    let source = "@template t { @foreach x in items { @x } }";
    let library = engine.parse(source).unwrap();
    let root = dict_of(vec![("items", Value::Array(vec![Value::Number(1.0)]))]);
    engine.render_text_by_id(&library, "t", root).unwrap();

    // A fresh accessor never had `x` bound either; this documents the contract
    // that VariableNotFound is the only way to observe a loop variable.
    let ctx = ContextAccessor::new(
        Value::Null,
        std::sync::Arc::new(llt::metadata::MetadataCollection::new()),
        std::sync::Arc::new(llt::functions::TemplateFunctionSet::default()),
        library,
    );
    assert!(llt::expr::Expr::identifier("x").evaluate(&ctx).is_err());
}
