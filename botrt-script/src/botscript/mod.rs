//! botscript, the built-in script language
//!
//! A JavaScript-flavoured subset: `let`/`const`, arrow and function
//! expressions, closures, template strings, spread, optional chaining,
//! `try`/`catch` and the usual loops. There is no `await`; asynchronous work
//! is chained with `.then`.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;

use crate::error::{CompileError, ScriptError};
use crate::host::{Bindings, CompiledScript, RunOutcome, ScriptEnv, ScriptHost, ScriptKind};
use ast::Stmt;
use std::sync::Arc;

/// [`ScriptHost`] for botscript
#[derive(Debug, Clone, Copy)]
pub struct BotScriptHost;

impl BotScriptHost {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BotScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHost for BotScriptHost {
    fn compile(&self, source: &str, kind: ScriptKind) -> Result<Arc<dyn CompiledScript>, CompileError> {
        let program = parser::parse(source)?;
        tracing::trace!(statements = program.len(), ?kind, "compiled script");
        Ok(Arc::new(BotScript {
            source: source.to_string(),
            program,
            kind,
        }))
    }
}

struct BotScript {
    source: String,
    program: Vec<Stmt>,
    kind: ScriptKind,
}

impl CompiledScript for BotScript {
    fn run(&self, env: &mut dyn ScriptEnv, bindings: Bindings) -> Result<RunOutcome, ScriptError> {
        interp::run_program(env, &self.program, self.kind, bindings)
    }

    fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::Energy;
    use crate::value::Value;
    use std::collections::BTreeMap;

    /// Minimal environment: host references are plain maps keyed by bot id,
    /// `log(x)` records its argument.
    struct TestEnv {
        energy: Energy,
        bots: BTreeMap<String, BTreeMap<String, Value>>,
        logged: Vec<Value>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self {
                energy: Energy::new(10_000),
                bots: BTreeMap::new(),
                logged: Vec::new(),
            }
        }
    }

    impl ScriptEnv for TestEnv {
        fn consume_energy(&mut self, amount: u64) -> Result<(), ScriptError> {
            self.energy.consume(amount)
        }

        fn get_member(&mut self, target: &Value, key: &str) -> Result<Value, ScriptError> {
            let id = target.bot_id().unwrap_or_default();
            Ok(self
                .bots
                .get(id)
                .and_then(|tags| tags.get(key))
                .cloned()
                .unwrap_or_default())
        }

        fn set_member(&mut self, target: &Value, key: &str, value: Value) -> Result<(), ScriptError> {
            let id = target.bot_id().unwrap_or_default().to_string();
            self.bots.entry(id).or_default().insert(key.to_string(), value);
            Ok(())
        }

        fn delete_member(&mut self, target: &Value, key: &str) -> Result<bool, ScriptError> {
            let id = target.bot_id().unwrap_or_default();
            Ok(self
                .bots
                .get_mut(id)
                .and_then(|tags| tags.remove(key))
                .is_some())
        }

        fn keys(&mut self, target: &Value) -> Result<Vec<String>, ScriptError> {
            let id = target.bot_id().unwrap_or_default();
            Ok(self
                .bots
                .get(id)
                .map(|tags| tags.keys().cloned().collect())
                .unwrap_or_default())
        }

        fn call_method(&mut self, _: &Value, _: &str, _: Vec<Value>) -> Result<Option<Value>, ScriptError> {
            Ok(None)
        }

        fn call_value(&mut self, callee: &Value, _: Vec<Value>) -> Result<Value, ScriptError> {
            Err(ScriptError::type_error(format!("{} is not a function", callee)))
        }

        fn call_library(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, ScriptError> {
            match name {
                "log" => {
                    self.logged.extend(args);
                    Ok(Some(Value::Undefined))
                }
                _ => Ok(None),
            }
        }
    }

    fn run_with(env: &mut TestEnv, kind: ScriptKind, source: &str, bindings: Bindings) -> Result<RunOutcome, ScriptError> {
        let script = BotScriptHost::new().compile(source, kind).unwrap();
        script.run(env, bindings)
    }

    fn formula(source: &str) -> Value {
        run_with(&mut TestEnv::new(), ScriptKind::Formula, source, Bindings::default())
            .unwrap()
            .value
    }

    fn listener(source: &str) -> Result<RunOutcome, ScriptError> {
        run_with(&mut TestEnv::new(), ScriptKind::Listener, source, Bindings::default())
    }

    #[test]
    fn test_formula_value_is_last_expression() {
        assert_eq!(formula("1 + 2"), Value::from(3));
        assert_eq!(formula("let x = 2; x * 10"), Value::from(20));
        assert_eq!(formula("'a' + 1"), Value::from("a1"));
    }

    #[test]
    fn test_listener_needs_explicit_return() {
        assert_eq!(listener("1 + 2").unwrap().value, Value::Undefined);
        assert_eq!(listener("return 1 + 2").unwrap().value, Value::from(3));
    }

    #[test]
    fn test_closures_share_their_scope() {
        let source = "
            let count = 0;
            const inc = () => { count += 1; };
            inc(); inc();
            count
        ";
        assert_eq!(formula(source), Value::from(2));
    }

    #[test]
    fn test_function_declarations_are_hoisted() {
        assert_eq!(formula("double(4); function double(x) { return x * 2 }"), Value::from(8));
    }

    #[test]
    fn test_recursion() {
        let source = "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2) } fib(10)";
        assert_eq!(formula(source), Value::from(55));
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(formula("[1, 2, 3].map(x => x * 2).join('-')"), Value::from("2-4-6"));
        assert_eq!(formula("[1, 2, 3, 4].filter(x => x % 2 == 0).length"), Value::from(2));
        assert_eq!(formula("[1, 2, 3].reduce((a, b) => a + b, 0)"), Value::from(6));
        assert_eq!(formula("[3, 1, 2].sort((a, b) => a - b)[0]"), Value::from(1));
    }

    #[test]
    fn test_push_writes_through_variable() {
        assert_eq!(formula("let a = [1]; a.push(2, 3); a.length"), Value::from(3));
        assert_eq!(formula("let o = { list: [] }; o.list.push(1); o.list[0]"), Value::from(1));
    }

    #[test]
    fn test_arrays_are_values() {
        assert_eq!(formula("let a = [1]; let b = a; b.push(2); a.length"), Value::from(1));
    }

    #[test]
    fn test_that_edits_are_returned() {
        let bindings = Bindings {
            that: Value::object([("responses", Value::Array(vec![]))]),
            ..Bindings::default()
        };
        let outcome = run_with(
            &mut TestEnv::new(),
            ScriptKind::Listener,
            "that.responses.push('hi'); data.responses.push('there')",
            bindings,
        )
        .unwrap();
        let responses = outcome.that.as_object().unwrap()["responses"].clone();
        assert_eq!(responses, Value::Array(vec![Value::from("hi"), Value::from("there")]));
    }

    #[test]
    fn test_host_reference_writes_go_to_env() {
        let mut env = TestEnv::new();
        let bindings = Bindings {
            tags: Value::View {
                bot: "b".into(),
                kind: crate::value::ViewKind::Tags,
            },
            ..Bindings::default()
        };
        run_with(
            &mut env,
            ScriptKind::Listener,
            "tags.count = 1; tags.count += 4; tags.list = [1]; tags.list.push(2)",
            bindings,
        )
        .unwrap();
        assert_eq!(env.bots["b"]["count"], Value::from(5));
        assert_eq!(env.bots["b"]["list"], Value::Array(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn test_try_catch_and_finally() {
        let source = "
            let log = [];
            try { throw new Error('boom') } catch (e) { log.push(e.message) } finally { log.push('done') }
            log.join(',')
        ";
        assert_eq!(formula(source), Value::from("boom,done"));
    }

    #[test]
    fn test_uncaught_error_carries_position() {
        let err = listener("let a = 1;\n  missing()").unwrap_err();
        match err {
            ScriptError::Thrown { line, column, .. } => {
                assert_eq!((line, column), (Some(2), Some(3)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_infinite_loop_runs_out_of_energy() {
        let err = listener("while (true) {}").unwrap_err();
        assert!(err.is_out_of_energy());
    }

    #[test]
    fn test_out_of_energy_is_not_catchable() {
        let err = listener("try { while (true) {} } catch (e) { }").unwrap_err();
        assert!(err.is_out_of_energy());
    }

    #[test]
    fn test_library_calls_reach_env() {
        let mut env = TestEnv::new();
        run_with(&mut env, ScriptKind::Listener, "log('a', 1)", Bindings::default()).unwrap();
        assert_eq!(env.logged, vec![Value::from("a"), Value::from(1)]);
    }

    #[test]
    fn test_unknown_function_is_reference_error() {
        let err = listener("nope()").unwrap_err();
        assert_eq!(err.name(), "ReferenceError");
    }

    #[test]
    fn test_const_reassignment_fails() {
        let err = listener("const a = 1; a = 2").unwrap_err();
        assert_eq!(err.name(), "TypeError");
    }

    #[test]
    fn test_const_contents_can_change() {
        assert_eq!(
            formula("const a = [1]; a.push(2); a.unshift(0); a"),
            Value::Array(vec![Value::from(0), Value::from(1), Value::from(2)])
        );
        assert_eq!(formula("const o = { y: 1 }; o.x = 2; delete o.y; o.x + Object.keys(o).length"), Value::from(3));
        assert_eq!(formula("const o = { a: [] }; o.a.push(1); o.a.length"), Value::from(1));

        let err = listener("const a = [1]; a.push(2); a = []").unwrap_err();
        assert_eq!(err.name(), "TypeError");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(formula("Math.max(1, 5, 3)"), Value::from(5));
        assert_eq!(formula("JSON.stringify({ a: [1, 'x'] })"), Value::from(r#"{"a":[1,"x"]}"#));
        assert_eq!(formula("JSON.parse('[1,2]').length"), Value::from(2));
        assert_eq!(formula("Object.keys({ b: 1, a: 2 }).join()"), Value::from("a,b"));
        assert_eq!(formula("(1.005).toFixed(1)"), Value::from("1.0"));
        assert_eq!(formula("`n=${1 + 1}`"), Value::from("n=2"));
        assert_eq!(formula("'a,b'.split(',').length"), Value::from(2));
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        assert_eq!(formula("let o = null; o?.x ?? 'none'"), Value::from("none"));
        assert_eq!(formula("let o = { x: 0 }; o.x ?? 'none'"), Value::from(0));
    }

    #[test]
    fn test_spread_and_rest() {
        assert_eq!(formula("const f = (...xs) => xs.length; f(...[1, 2], 3)"), Value::from(3));
        assert_eq!(formula("const o = { ...{ a: 1 }, b: 2 }; o.a + o.b"), Value::from(3));
    }

    #[test]
    fn test_for_loops() {
        assert_eq!(formula("let s = 0; for (let i = 0; i < 5; i++) { s += i } s"), Value::from(10));
        assert_eq!(formula("let s = ''; for (const k in { a: 1, b: 2 }) { s += k } s"), Value::from("ab"));
        assert_eq!(
            formula("let s = 0; for (const x of [1, 2, 3]) { if (x == 2) continue; s += x } s"),
            Value::from(4)
        );
    }

    #[test]
    fn test_typeof_undeclared() {
        assert_eq!(formula("typeof nothing"), Value::from("undefined"));
        assert_eq!(formula("typeof (() => 1)"), Value::from("function"));
    }
}
