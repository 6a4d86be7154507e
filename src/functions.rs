//! The bare-identifier-call function set consulted by `ContextAccessor::call` (§4.9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TemplateRuntimeError as RtErr;
use crate::value::{ContextAccessor, Value};

type Callable = Arc<dyn Fn(&[Value], &ContextAccessor) -> Result<Value, RtErr> + Send + Sync>;

/// Identifier-to-callable map backing bare-call expressions like `length(x)` (§4.9).
#[derive(Clone)]
pub struct TemplateFunctionSet {
    functions: HashMap<String, Callable>,
}

impl std::fmt::Debug for TemplateFunctionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFunctionSet")
            .field("names", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for TemplateFunctionSet {
    fn default() -> Self {
        let mut set = Self {
            functions: HashMap::new(),
        };
        set.register("length", |args, _ctx| length(args));
        set.register("strcat", |args, _ctx| strcat(args));
        set.register("substr", |args, _ctx| substr(args));
        set
    }
}

impl TemplateFunctionSet {
    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value], &ContextAccessor) -> Result<Value, RtErr> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn call(&self, name: &str, args: &[Value], ctx: &ContextAccessor) -> Result<Value, RtErr> {
        match self.functions.get(name) {
            Some(f) => f(args, ctx),
            None => Err(RtErr::UnknownFunction(name.to_string())),
        }
    }
}

fn length(args: &[Value]) -> Result<Value, RtErr> {
    let receiver = args.first().ok_or_else(|| RtErr::UnknownFunction("length".to_string()))?;
    let n = match receiver {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Dict(d) => d.len(),
        other => return Err(RtErr::MethodNotSupported { name: "length".to_string(), on: other.kind() }),
    };
    Ok(Value::Number(n as f64))
}

fn strcat(args: &[Value]) -> Result<Value, RtErr> {
    let mut out = String::new();
    for a in args {
        out.push_str(&a.to_display_string()?);
    }
    Ok(Value::String(out))
}

fn substr(args: &[Value]) -> Result<Value, RtErr> {
    let s = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Err(RtErr::MethodNotSupported { name: "substr".to_string(), on: crate::value::ValueKind::Null }),
    };
    let chars: Vec<char> = s.chars().collect();
    let start = match args.get(1) {
        Some(Value::Number(n)) => *n as usize,
        _ => 0,
    };
    let len = match args.get(2) {
        Some(Value::Number(n)) => *n as usize,
        _ => chars.len().saturating_sub(start),
    };
    let end = (start + len).min(chars.len());
    let start = start.min(end);
    Ok(Value::String(chars[start..end].iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::TemplateLibrary;
    use crate::metadata::MetadataCollection;
    use std::sync::Arc;

    fn ctx() -> ContextAccessor {
        ContextAccessor::new(
            Value::Null,
            Arc::new(MetadataCollection::new()),
            Arc::new(TemplateFunctionSet::default()),
            Arc::new(TemplateLibrary::new()),
        )
    }

    #[test]
    fn length_of_string_and_array() {
        let set = TemplateFunctionSet::default();
        let c = ctx();
        assert_eq!(
            set.call("length", &[Value::String("abc".into())], &c).unwrap().to_display_string().unwrap(),
            "3"
        );
        assert_eq!(
            set.call("length", &[Value::Array(vec![Value::Null, Value::Null])], &c)
                .unwrap()
                .to_display_string()
                .unwrap(),
            "2"
        );
    }

    #[test]
    fn strcat_joins_display_strings() {
        let set = TemplateFunctionSet::default();
        let c = ctx();
        let result = set
            .call("strcat", &[Value::String("a".into()), Value::Number(1.0)], &c)
            .unwrap();
        assert_eq!(result.to_display_string().unwrap(), "a1");
    }

    #[test]
    fn substr_extracts_range() {
        let set = TemplateFunctionSet::default();
        let c = ctx();
        let result = set
            .call("substr", &[Value::String("hello".into()), Value::Number(1.0), Value::Number(3.0)], &c)
            .unwrap();
        assert_eq!(result.to_display_string().unwrap(), "ell");
    }

    #[test]
    fn unknown_function_errors() {
        let set = TemplateFunctionSet::default();
        let c = ctx();
        assert!(set.call("nope", &[], &c).is_err());
    }
}
