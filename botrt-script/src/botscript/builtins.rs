//! Built-in globals and methods on plain values

use super::interp::Interpreter;
use crate::error::ScriptError;
use crate::value::{number_to_string, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, ScriptError>;

const GLOBAL_OBJECTS: &[&str] = &["Math", "JSON", "Object", "Array", "Number", "String"];

const GLOBAL_FUNCTIONS: &[&str] = &[
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "Number",
    "String",
    "Boolean",
    "Error",
    "TypeError",
    "RangeError",
];

/// Longest string, in bytes, a script may build
pub const MAX_STRING_LENGTH: usize = 1 << 24;

/// Longest array a script may build
pub const MAX_ARRAY_LENGTH: usize = 1 << 22;

const MUTATING_ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "splice", "sort", "reverse", "fill",
];

pub(crate) fn check_string_length(len: usize) -> Result<()> {
    if len > MAX_STRING_LENGTH {
        return Err(ScriptError::range_error("Invalid string length"));
    }
    Ok(())
}

pub(crate) fn check_array_length(len: usize) -> Result<()> {
    if len > MAX_ARRAY_LENGTH {
        return Err(ScriptError::range_error("Invalid array length"));
    }
    Ok(())
}

pub(crate) fn is_global_object(name: &str) -> bool {
    GLOBAL_OBJECTS.contains(&name)
}

pub(crate) fn is_global_function(name: &str) -> bool {
    GLOBAL_FUNCTIONS.contains(&name)
}

pub(crate) fn is_mutating_array_method(name: &str) -> bool {
    MUTATING_ARRAY_METHODS.contains(&name)
}

pub(crate) fn global_value(name: &str) -> Option<Value> {
    match name {
        "NaN" => Some(Value::Number(f64::NAN)),
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        _ => None,
    }
}

/// Non-call property of a global object, e.g. `Math.PI`
pub(crate) fn global_property(object: &str, key: &str) -> Value {
    match (object, key) {
        ("Math", "PI") => Value::Number(std::f64::consts::PI),
        ("Math", "E") => Value::Number(std::f64::consts::E),
        ("Math", "LN2") => Value::Number(std::f64::consts::LN_2),
        ("Math", "SQRT2") => Value::Number(std::f64::consts::SQRT_2),
        ("Number", "MAX_SAFE_INTEGER") => Value::Number(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => Value::Number(-9_007_199_254_740_991.0),
        ("Number", "EPSILON") => Value::Number(f64::EPSILON),
        ("Number", "POSITIVE_INFINITY") => Value::Number(f64::INFINITY),
        ("Number", "NEGATIVE_INFINITY") => Value::Number(f64::NEG_INFINITY),
        ("Number", "NaN") => Value::Number(f64::NAN),
        _ => Value::Undefined,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn number_arg(args: &[Value], index: usize) -> f64 {
    args.get(index).map(Value::to_number).unwrap_or(f64::NAN)
}

/// Resolve a relative index the way `slice` does
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> usize {
    match value {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            if n < 0.0 {
                (len as f64 + n).max(0.0) as usize
            } else {
                (n as usize).min(len)
            }
        }
    }
}

pub(crate) fn call_global_function(name: &str, args: Vec<Value>) -> Result<Value> {
    Ok(match name {
        "parseInt" => Value::Number(parse_int(&arg(&args, 0).to_string(), args.get(1))),
        "parseFloat" => Value::Number(parse_float(&arg(&args, 0).to_string())),
        "isNaN" => Value::Bool(number_arg(&args, 0).is_nan()),
        "isFinite" => Value::Bool(number_arg(&args, 0).is_finite()),
        "Number" => Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)),
        "String" => Value::String(args.first().map(Value::to_string).unwrap_or_default()),
        "Boolean" => Value::Bool(arg(&args, 0).is_truthy()),
        "Error" | "TypeError" | "RangeError" => {
            let message = match args.first() {
                None | Some(Value::Undefined) => String::new(),
                Some(v) => v.to_string(),
            };
            Value::error(name, message)
        }
        _ => return Err(ScriptError::reference_error(format!("{} is not defined", name))),
    })
}

fn parse_int(text: &str, radix: Option<&Value>) -> f64 {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let mut radix = radix.map(Value::to_number).filter(|r| *r >= 2.0 && *r <= 36.0).unwrap_or(10.0) as u32;
    let digits = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) if radix == 16 || radix == 10 => {
            radix = 16;
            hex
        }
        _ => digits,
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let value = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim();
    if text.starts_with("Infinity") || text.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    // longest prefix that parses
    (1..=text.len())
        .rev()
        .filter(|end| text.is_char_boundary(*end))
        .find_map(|end| text[..end].parse::<f64>().ok().filter(|_| !text[..end].ends_with(['e', 'E'])))
        .unwrap_or(f64::NAN)
}

/// `Math.max(...)`, `JSON.stringify(...)`, `Object.keys(...)` and friends
pub(crate) fn call_static(
    interp: &mut Interpreter<'_>,
    object: &str,
    key: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let unknown = || ScriptError::type_error(format!("{}.{} is not a function", object, key));
    match object {
        "Math" => math(key, &args).ok_or_else(unknown),
        "JSON" => match key {
            "stringify" => {
                let value = arg(&args, 0);
                if matches!(value, Value::Undefined | Value::Function(_)) {
                    return Ok(Value::Undefined);
                }
                let json = value.to_json();
                let text = if args.get(2).is_some_and(|v| !v.is_nullish()) {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                }
                .map_err(|e| ScriptError::type_error(e.to_string()))?;
                Ok(Value::String(text))
            }
            "parse" => {
                let text = arg(&args, 0).to_string();
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(|json| Value::from_json(&json))
                    .map_err(|e| ScriptError::error("SyntaxError", e.to_string()))
            }
            _ => Err(unknown()),
        },
        "Object" => {
            let target = arg(&args, 0);
            match key {
                "keys" => Ok(Value::Array(
                    interp.keys_of(&target)?.into_iter().map(Value::String).collect(),
                )),
                "values" | "entries" => {
                    let mut out = Vec::new();
                    for k in interp.keys_of(&target)? {
                        let v = interp.get_property(&target, &k)?;
                        out.push(if key == "values" {
                            v
                        } else {
                            Value::Array(vec![Value::String(k), v])
                        });
                    }
                    Ok(Value::Array(out))
                }
                "assign" => {
                    let mut map = match target {
                        Value::Object(map) => map,
                        _ => BTreeMap::new(),
                    };
                    for source in args.iter().skip(1) {
                        for k in interp.keys_of(source)? {
                            let v = interp.get_property(source, &k)?;
                            map.insert(k, v);
                        }
                    }
                    Ok(Value::Object(map))
                }
                "fromEntries" => {
                    let mut map = BTreeMap::new();
                    if let Value::Array(pairs) = target {
                        for pair in pairs {
                            if let Value::Array(kv) = pair {
                                map.insert(arg(&kv, 0).to_string(), arg(&kv, 1));
                            }
                        }
                    }
                    Ok(Value::Object(map))
                }
                _ => Err(unknown()),
            }
        }
        "Array" => match key {
            "isArray" => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
            "from" => match arg(&args, 0) {
                Value::Array(items) => Ok(Value::Array(items)),
                Value::String(s) => Ok(Value::Array(
                    s.chars().map(|c| Value::String(c.to_string())).collect(),
                )),
                _ => Ok(Value::Array(Vec::new())),
            },
            "of" => Ok(Value::Array(args)),
            _ => Err(unknown()),
        },
        "Number" => {
            let n = match args.first() {
                Some(Value::Number(n)) => Some(*n),
                _ => None,
            };
            match key {
                "isInteger" => Ok(Value::Bool(n.is_some_and(|n| n.is_finite() && n == n.trunc()))),
                "isFinite" => Ok(Value::Bool(n.is_some_and(f64::is_finite))),
                "isNaN" => Ok(Value::Bool(n.is_some_and(f64::is_nan))),
                "parseFloat" => Ok(Value::Number(parse_float(&arg(&args, 0).to_string()))),
                "parseInt" => Ok(Value::Number(parse_int(&arg(&args, 0).to_string(), args.get(1)))),
                _ => Err(unknown()),
            }
        }
        "String" => match key {
            "fromCharCode" => Ok(Value::String(
                args.iter()
                    .filter_map(|v| char::from_u32(v.to_number() as u32))
                    .collect(),
            )),
            _ => Err(unknown()),
        },
        _ => Err(unknown()),
    }
}

fn math(key: &str, args: &[Value]) -> Option<Value> {
    let x = number_arg(args, 0);
    let n = match key {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "abs" => x.abs(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "exp" => x.exp(),
        "log" => x.ln(),
        "log2" => x.log2(),
        "log10" => x.log10(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "atan2" => x.atan2(number_arg(args, 1)),
        "pow" => x.powf(number_arg(args, 1)),
        "hypot" => args.iter().map(|v| v.to_number().powi(2)).sum::<f64>().sqrt(),
        "min" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(v) }),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(v) }),
        _ => return None,
    };
    Some(Value::Number(n))
}

fn callback(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(f @ (Value::Function(_) | Value::Listener { .. })) => Ok(f.clone()),
        Some(other) => Err(ScriptError::type_error(format!("{} is not a function", other))),
        None => Err(ScriptError::type_error("undefined is not a function")),
    }
}

fn index_of(items: &[Value], needle: &Value) -> Option<usize> {
    items.iter().position(|item| item.strict_equals(needle))
}

fn flatten(items: Vec<Value>, depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => flatten(inner, depth - 1.0, out),
            other => out.push(other),
        }
    }
}

/// Methods that do not modify the receiver
pub(crate) fn call_array_method(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: &str,
    args: Vec<Value>,
) -> Result<Value> {
    match key {
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" | "flatMap" => {
            let f = callback(&args)?;
            let mut mapped = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let result = interp.call_value(
                    &f,
                    vec![item.clone(), Value::from(i), Value::Array(items.clone())],
                )?;
                match key {
                    "map" => mapped.push(result),
                    "flatMap" => {
                        match result {
                            Value::Array(inner) => mapped.extend(inner),
                            other => mapped.push(other),
                        }
                        check_array_length(mapped.len())?;
                    }
                    "filter" if result.is_truthy() => mapped.push(item.clone()),
                    "find" if result.is_truthy() => return Ok(item.clone()),
                    "findIndex" if result.is_truthy() => return Ok(Value::from(i)),
                    "some" if result.is_truthy() => return Ok(Value::Bool(true)),
                    "every" if !result.is_truthy() => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            Ok(match key {
                "map" | "filter" | "flatMap" => Value::Array(mapped),
                "find" => Value::Undefined,
                "findIndex" => Value::from(-1),
                "some" => Value::Bool(false),
                "every" => Value::Bool(true),
                _ => Value::Undefined,
            })
        }
        "reduce" => {
            let f = callback(&args)?;
            let mut iter = items.iter().cloned().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(ScriptError::type_error(
                            "Reduce of empty array with no initial value",
                        ))
                    }
                },
            };
            for (i, item) in iter {
                acc = interp.call_value(&f, vec![acc, item, Value::from(i)])?;
            }
            Ok(acc)
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(Value::Bool(items.iter().any(|item| {
                item.strict_equals(&needle)
                    || matches!((item, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            })))
        }
        "indexOf" => Ok(match index_of(&items, &arg(&args, 0)) {
            Some(i) => Value::from(i),
            None => Value::from(-1),
        }),
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(v) => v.to_string(),
            };
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&separator);
                }
                if !item.is_nullish() {
                    out.push_str(&item.to_string());
                }
                check_string_length(out.len())?;
            }
            Ok(Value::String(out))
        }
        "slice" => {
            let len = items.len();
            let start = relative_index(args.first(), len, 0);
            let end = relative_index(args.get(1), len, len);
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        "concat" => {
            let mut out = items;
            for extra in args {
                match extra {
                    Value::Array(more) => out.extend(more),
                    other => out.push(other),
                }
                check_array_length(out.len())?;
            }
            Ok(Value::Array(out))
        }
        "flat" => {
            let depth = match args.first() {
                None | Some(Value::Undefined) => 1.0,
                Some(v) => v.to_number(),
            };
            let mut out = Vec::new();
            flatten(items, depth, &mut out);
            check_array_length(out.len())?;
            Ok(Value::Array(out))
        }
        "at" => {
            let n = number_arg(&args, 0).trunc();
            let index = if n < 0.0 { items.len() as f64 + n } else { n };
            Ok(if index >= 0.0 {
                items.get(index as usize).cloned().unwrap_or_default()
            } else {
                Value::Undefined
            })
        }
        "toString" => Ok(Value::String(Value::Array(items).to_string())),
        _ => Err(ScriptError::type_error(format!("{} is not a function", key))),
    }
}

/// Methods that modify the receiver in place
pub(crate) fn call_mutating_array_method(
    interp: &mut Interpreter<'_>,
    items: &mut Vec<Value>,
    key: &str,
    args: Vec<Value>,
) -> Result<Value> {
    match key {
        "push" => {
            check_array_length(items.len() + args.len())?;
            items.extend(args);
            Ok(Value::from(items.len()))
        }
        "pop" => Ok(items.pop().unwrap_or_default()),
        "shift" => Ok(if items.is_empty() {
            Value::Undefined
        } else {
            items.remove(0)
        }),
        "unshift" => {
            check_array_length(items.len() + args.len())?;
            items.splice(0..0, args);
            Ok(Value::from(items.len()))
        }
        "splice" => {
            let len = items.len();
            let start = relative_index(args.first(), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(v) => (v.to_number().max(0.0) as usize).min(len - start),
            };
            check_array_length(len + args.len().saturating_sub(2))?;
            let removed: Vec<Value> = items
                .splice(start..start + count, args.into_iter().skip(2))
                .collect();
            Ok(Value::Array(removed))
        }
        "reverse" => {
            items.reverse();
            Ok(Value::Array(items.clone()))
        }
        "fill" => {
            let value = arg(&args, 0);
            let len = items.len();
            let start = relative_index(args.get(1), len, 0);
            let end = relative_index(args.get(2), len, len);
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            Ok(Value::Array(items.clone()))
        }
        "sort" => {
            let mut failure = None;
            match args.first() {
                Some(f @ (Value::Function(_) | Value::Listener { .. })) => {
                    let f = f.clone();
                    items.sort_by(|a, b| {
                        if failure.is_some() {
                            return Ordering::Equal;
                        }
                        match interp.call_value(&f, vec![a.clone(), b.clone()]) {
                            Ok(v) => v.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                            Err(e) => {
                                failure = Some(e);
                                Ordering::Equal
                            }
                        }
                    });
                }
                _ => items.sort_by(|a, b| match (a, b) {
                    (Value::Undefined, Value::Undefined) => Ordering::Equal,
                    (Value::Undefined, _) => Ordering::Greater,
                    (_, Value::Undefined) => Ordering::Less,
                    _ => a.to_string().cmp(&b.to_string()),
                }),
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(Value::Array(items.clone())),
            }
        }
        _ => Err(ScriptError::type_error(format!("{} is not a function", key))),
    }
}

pub(crate) fn call_string_method(
    interp: &mut Interpreter<'_>,
    s: &str,
    key: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let chars: Vec<char> = s.chars().collect();
    let text_arg = |i: usize| args.get(i).map(Value::to_string).unwrap_or_default();
    let value = match key {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "includes" => Value::Bool(s.contains(text_arg(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(text_arg(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(text_arg(0).as_str())),
        "indexOf" => match s.find(text_arg(0).as_str()) {
            Some(byte) => Value::from(s[..byte].chars().count()),
            None => Value::from(-1),
        },
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::Array(vec![Value::from(s)]),
            Some(sep) => {
                let sep = sep.to_string();
                if sep.is_empty() {
                    Value::Array(chars.iter().map(|c| Value::String(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(Value::from).collect())
                }
            }
        },
        "slice" | "substring" => {
            let len = chars.len();
            let (start, end) = if key == "slice" {
                (
                    relative_index(args.first(), len, 0),
                    relative_index(args.get(1), len, len),
                )
            } else {
                let clamp = |v: Option<&Value>, default: usize| match v {
                    None | Some(Value::Undefined) => default,
                    Some(v) => (v.to_number().max(0.0) as usize).min(len),
                };
                let (a, b) = (clamp(args.first(), 0), clamp(args.get(1), len));
                (a.min(b), a.max(b))
            };
            if start < end {
                Value::String(chars[start..end].iter().collect())
            } else {
                Value::from("")
            }
        }
        "replace" | "replaceAll" => {
            let pattern = text_arg(0);
            let replacement = match args.get(1) {
                Some(f @ Value::Function(_)) => {
                    let f = f.clone();
                    interp.call_value(&f, vec![Value::String(pattern.clone())])?.to_string()
                }
                _ => text_arg(1),
            };
            let hits = if key == "replace" {
                usize::from(s.contains(pattern.as_str()))
            } else if pattern.is_empty() {
                chars.len() + 1
            } else {
                s.matches(pattern.as_str()).count()
            };
            check_string_length(s.len().saturating_add(hits.saturating_mul(replacement.len())))?;
            if key == "replace" {
                Value::String(s.replacen(pattern.as_str(), &replacement, 1))
            } else {
                Value::String(s.replace(pattern.as_str(), &replacement))
            }
        }
        "repeat" => {
            let count = number_arg(&args, 0);
            if count < 0.0 || count.is_infinite() {
                return Err(ScriptError::range_error("Invalid count value"));
            }
            check_string_length(s.len().saturating_mul(count as usize))?;
            Value::String(s.repeat(count as usize))
        }
        "charAt" => {
            let i = number_arg(&args, 0);
            let i = if i.is_nan() { 0 } else { i as usize };
            Value::String(chars.get(i).map(|c| c.to_string()).unwrap_or_default())
        }
        "padStart" | "padEnd" => {
            let target = number_arg(&args, 0).max(0.0) as usize;
            let fill = match args.get(1) {
                None | Some(Value::Undefined) => " ".to_string(),
                Some(v) => v.to_string(),
            };
            if chars.len() >= target || fill.is_empty() {
                Value::from(s)
            } else {
                check_string_length(target)?;
                let padding: String = fill.chars().cycle().take(target - chars.len()).collect();
                if key == "padStart" {
                    Value::String(format!("{}{}", padding, s))
                } else {
                    Value::String(format!("{}{}", s, padding))
                }
            }
        }
        "toString" => Value::from(s),
        _ => return Err(ScriptError::type_error(format!("{} is not a function", key))),
    };
    Ok(value)
}

pub(crate) fn call_number_method(n: f64, key: &str, args: Vec<Value>) -> Result<Value> {
    match key {
        "toFixed" => {
            let digits = match args.first() {
                None | Some(Value::Undefined) => 0,
                Some(v) => v.to_number().clamp(0.0, 100.0) as usize,
            };
            Ok(Value::String(format!("{:.*}", digits, n)))
        }
        "toString" => Ok(Value::String(number_to_string(n))),
        _ => Err(ScriptError::type_error(format!("{} is not a function", key))),
    }
}

pub(crate) fn call_object_method(
    map: &BTreeMap<String, Value>,
    key: &str,
    args: Vec<Value>,
) -> Result<Value> {
    match key {
        "hasOwnProperty" => Ok(Value::Bool(map.contains_key(&arg(&args, 0).to_string()))),
        "toString" => Ok(Value::from("[object Object]")),
        _ => Err(ScriptError::type_error(format!("{} is not a function", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_stops_at_first_invalid_digit() {
        assert_eq!(parse_int("42px", None), 42.0);
        assert_eq!(parse_int("-0x1F", None), -31.0);
        assert!(parse_int("abc", None).is_nan());
    }

    #[test]
    fn test_parse_float_uses_longest_prefix() {
        assert_eq!(parse_float("3.5e2x"), 350.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert!(parse_float("x1").is_nan());
    }

    #[test]
    fn test_math_min_max_without_arguments() {
        assert_eq!(math("max", &[]), Some(Value::Number(f64::NEG_INFINITY)));
        assert_eq!(math("min", &[Value::from(3), Value::from(1)]), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_math_round_half_up() {
        assert_eq!(math("round", &[Value::from(-2.5)]), Some(Value::Number(-2.0)));
        assert_eq!(math("round", &[Value::from(2.5)]), Some(Value::Number(3.0)));
    }

    #[test]
    fn test_relative_index() {
        assert_eq!(relative_index(Some(&Value::from(-1)), 5, 0), 4);
        assert_eq!(relative_index(Some(&Value::from(9)), 5, 0), 5);
        assert_eq!(relative_index(None, 5, 5), 5);
    }
}
