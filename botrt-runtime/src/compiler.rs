//! Tag compilation
//!
//! Raw tag values are turned into one of four shapes:
//!
//! - plain literals, with numeric and boolean strings coerced
//! - formulas (`=` prefix), evaluated lazily and memoised by the runtime
//! - formula arrays (`[1, =a + 1]`), literal arrays with formula elements
//! - listeners (`@` prefix), compiled but never evaluated on read
//!
//! Compile errors never escape: they are kept on the tag and surface when
//! the tag is evaluated or invoked.

use botrt_script::{CompileError, CompiledScript, ScriptHost, ScriptKind, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("valid number regex")
});

pub type CompileOutcome = Result<Arc<dyn CompiledScript>, CompileError>;

/// One element of a formula array
#[derive(Clone)]
pub enum ArrayItem {
    Literal(Value),
    Formula(CompileOutcome),
}

/// Compiled form of a raw tag value
#[derive(Clone)]
pub enum CompiledTag {
    Literal(Value),
    Formula(CompileOutcome),
    FormulaArray(Vec<ArrayItem>),
    Listener(CompileOutcome),
}

impl CompiledTag {
    pub fn is_formula(&self) -> bool {
        matches!(self, CompiledTag::Formula(_) | CompiledTag::FormulaArray(_))
    }

    pub fn is_listener(&self) -> bool {
        matches!(self, CompiledTag::Listener(_))
    }
}

impl std::fmt::Debug for CompiledTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledTag::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            CompiledTag::Formula(_) => f.write_str("Formula"),
            CompiledTag::FormulaArray(items) => write!(f, "FormulaArray({})", items.len()),
            CompiledTag::Listener(_) => f.write_str("Listener"),
        }
    }
}

/// Compiles raw tag values through a [`ScriptHost`]
#[derive(Clone)]
pub struct TagCompiler {
    host: Arc<dyn ScriptHost>,
}

impl TagCompiler {
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self { host }
    }

    pub fn compile(&self, raw: &serde_json::Value) -> CompiledTag {
        let text = match raw {
            serde_json::Value::String(text) => text,
            other => return CompiledTag::Literal(Value::from_json(other)),
        };

        if let Some(source) = text.strip_prefix('=') {
            return CompiledTag::Formula(self.compile_script(source, ScriptKind::Formula));
        }
        if let Some(source) = text.strip_prefix('@') {
            return CompiledTag::Listener(self.compile_script(source, ScriptKind::Listener));
        }

        if let Some(items) = array_items(text) {
            if items.iter().any(|item| item.starts_with('=')) {
                let compiled = items
                    .iter()
                    .map(|item| match item.strip_prefix('=') {
                        Some(source) => {
                            ArrayItem::Formula(self.compile_script(source, ScriptKind::Formula))
                        }
                        None => ArrayItem::Literal(coerce_item(item)),
                    })
                    .collect();
                return CompiledTag::FormulaArray(compiled);
            }
        }

        CompiledTag::Literal(coerce_literal(text))
    }

    /// Compile an arbitrary script (used by `execute` and `run_script`)
    pub fn compile_script(&self, source: &str, kind: ScriptKind) -> CompileOutcome {
        self.host.compile(&normalize_quotes(source), kind)
    }
}

/// Replace typographic quotes with their ASCII counterparts
pub fn normalize_quotes(source: &str) -> String {
    source
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect()
}

/// Coerce literal tag text: numbers, booleans and `[...]` arrays
pub fn coerce_literal(text: &str) -> Value {
    if NUMBER_RE.is_match(text) {
        if let Ok(n) = text.parse::<f64>() {
            return Value::Number(n);
        }
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Some(items) = array_items(text) {
        return Value::Array(items.iter().map(|item| coerce_item(item)).collect());
    }
    Value::String(text.to_string())
}

/// Coerce a raw mask value. Masks are never compiled as scripts.
pub fn coerce_json(raw: &serde_json::Value) -> Value {
    match raw {
        serde_json::Value::String(text) => coerce_literal(text),
        other => Value::from_json(other),
    }
}

fn coerce_item(item: &str) -> Value {
    match unquote(item) {
        Some(inner) => Value::String(inner.to_string()),
        None => coerce_literal(item),
    }
}

fn unquote(item: &str) -> Option<&str> {
    let bytes = item.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&item[1..item.len() - 1]);
        }
    }
    None
}

/// Split `[a, "b, c", d]` into trimmed elements, honouring quotes
fn array_items(text: &str) -> Option<Vec<String>> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in inner.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => items.push(std::mem::take(&mut current).trim().to_string()),
                _ => current.push(c),
            },
        }
    }
    items.push(current.trim().to_string());
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrt_script::BotScriptHost;
    use proptest::prelude::*;
    use serde_json::json;

    fn compiler() -> TagCompiler {
        TagCompiler::new(Arc::new(BotScriptHost::new()))
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(coerce_literal("123.145"), Value::Number(123.145));
        assert_eq!(coerce_literal(".5"), Value::Number(0.5));
        assert_eq!(coerce_literal("-2e3"), Value::Number(-2000.0));
        assert_eq!(coerce_literal("+7"), Value::Number(7.0));
        assert_eq!(coerce_literal("1."), Value::Number(1.0));
        assert_eq!(coerce_literal("1.2.3"), Value::from("1.2.3"));
        assert_eq!(coerce_literal("0x10"), Value::from("0x10"));
        assert_eq!(coerce_literal(""), Value::from(""));
    }

    #[test]
    fn test_booleans() {
        assert_eq!(coerce_literal("true"), Value::Bool(true));
        assert_eq!(coerce_literal("false"), Value::Bool(false));
        assert_eq!(coerce_literal("True"), Value::from("True"));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            coerce_literal("[1, 'a,b', true, x]"),
            Value::Array(vec![
                Value::Number(1.0),
                Value::from("a,b"),
                Value::Bool(true),
                Value::from("x"),
            ])
        );
        assert_eq!(coerce_literal("[]"), Value::Array(vec![]));
    }

    #[test]
    fn test_compile_shapes() {
        let compiler = compiler();
        assert!(matches!(compiler.compile(&json!("=1 + 1")), CompiledTag::Formula(Ok(_))));
        assert!(matches!(compiler.compile(&json!("@return 1")), CompiledTag::Listener(Ok(_))));
        assert!(matches!(compiler.compile(&json!("[1, =2]")), CompiledTag::FormulaArray(_)));
        assert!(matches!(
            compiler.compile(&json!(5)),
            CompiledTag::Literal(Value::Number(n)) if n == 5.0
        ));
    }

    #[test]
    fn test_compile_errors_are_kept() {
        match compiler().compile(&json!("=1 +")) {
            CompiledTag::Formula(Err(err)) => assert_eq!(err.line, 1),
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_curly_quotes_are_normalised() {
        assert_eq!(normalize_quotes("\u{201C}hi\u{201D} + \u{2018}x\u{2019}"), "\"hi\" + 'x'");
        assert!(matches!(compiler().compile(&json!("=\u{201C}hi\u{201D}")), CompiledTag::Formula(Ok(_))));
    }

    proptest! {
        #[test]
        fn prop_finite_numbers_coerce_exactly(n in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            prop_assert_eq!(coerce_literal(&n.to_string()), Value::Number(n));
        }

        #[test]
        fn prop_words_stay_strings(s in "[a-zA-Z_][a-zA-Z0-9_ ]{0,12}") {
            prop_assume!(s != "true" && s != "false");
            prop_assert_eq!(coerce_literal(&s), Value::String(s.clone()));
        }
    }
}
