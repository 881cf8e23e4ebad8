//! End-to-end behavior of the bot runtime

use botrt_runtime::{
    BotRuntime, DefaultEditModes, EditModeProvider, RuntimeConfig, RuntimeError, SequentialIds,
};
use botrt_script::Value;
use botrt_types::{Action, Bot, BotUpdate, RealtimeEditMode, Space};
use serde_json::json;
use std::sync::Arc;

fn removed_ids(actions: &[Action]) -> Vec<&str> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::BotRemoved { id } => Some(id.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_add_overwrite_is_idempotent() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a").with_tag("n", "1"), Bot::new("b")]);

    let event = runtime.add_bots(vec![Bot::new("a").with_tag("m", "2")]);
    assert_eq!(event.added_bots, vec!["a".to_string()]);
    assert_eq!(runtime.bot_count(), 2);
    // overwriting keeps the original position
    assert_eq!(runtime.bot_ids(), vec!["a".to_string(), "b".to_string()]);

    let mut a = runtime.bot("a").unwrap();
    assert_eq!(a.raw("n"), None);
    assert_eq!(a.tag("m"), Value::Number(2.0));
}

#[test]
fn test_bot_count_formula_tracks_adds() {
    let mut runtime = BotRuntime::default();
    let event = runtime.add_bots(vec![Bot::new("counter").with_tag("numBots", "=getBots().length")]);
    assert_eq!(event.value("counter", "numBots"), Some(&json!(1)));

    let event = runtime.add_bots(vec![Bot::new("other")]);
    assert_eq!(event.added_bots, vec!["other".to_string()]);
    assert_eq!(event.updated_bots, vec!["counter".to_string()]);
    assert_eq!(event.value("counter", "numBots"), Some(&json!(2)));

    let event = runtime.remove_bots(vec!["other".to_string()]);
    assert_eq!(event.value("counter", "numBots"), Some(&json!(1)));
}

#[test]
fn test_tag_filter_only_recalculates_on_matching_changes() {
    let mut runtime = BotRuntime::default().with_id_generator(SequentialIds::new("id-"));
    // every evaluation draws one id, so the next uuid() reveals how often
    // the formula ran
    runtime.add_bots(vec![Bot::new("watcher").with_tag("count", "=uuid() ? getBots('num').length : 0")]);
    assert_eq!(runtime.execute("return uuid()").unwrap().value, json!("id-2"));

    runtime.add_bots(vec![Bot::new("plain").with_tag("color", "red")]);
    runtime.update_bots(vec![BotUpdate::new("plain").with_tag("color", "blue")]);
    assert_eq!(runtime.execute("return uuid()").unwrap().value, json!("id-3"));

    let event = runtime.add_bots(vec![Bot::new("numbered").with_tag("num", "5")]);
    assert_eq!(event.value("watcher", "count"), Some(&json!(1)));
    assert_eq!(runtime.execute("return uuid()").unwrap().value, json!("id-5"));
}

#[test]
fn test_cascading_destroy_respects_destroyable() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![
        Bot::new("root"),
        Bot::new("kept").with_tag("creator", "root").with_tag("destroyable", "false"),
        Bot::new("kept-child").with_tag("creator", "kept"),
        Bot::new("child").with_tag("creator", "root"),
        Bot::new("grandchild").with_tag("creator", "child"),
        Bot::new("unrelated"),
    ]);

    let result = runtime.execute("destroy(getBot('id', 'root'))").unwrap();
    assert_eq!(removed_ids(&result.actions), vec!["root", "child", "grandchild"]);
    assert_eq!(
        runtime.bot_ids(),
        vec!["kept".to_string(), "kept-child".to_string(), "unrelated".to_string()]
    );
}

#[test]
fn test_delayed_space_emits_without_applying() {
    let provider = |space: &Space| {
        if space.as_str() == "delayed" {
            RealtimeEditMode::Delayed
        } else {
            DefaultEditModes.edit_mode(space)
        }
    };
    let mut runtime = BotRuntime::default().with_edit_mode_provider(Arc::new(provider));
    runtime.add_bots(vec![Bot::new("d").with_space("delayed").with_tag("n", "1")]);

    let result = runtime
        .execute("const d = getBot('id', 'd'); d.tags.n = 2; return [d.tags.n, create({space: 'delayed'})]")
        .unwrap();
    assert_eq!(result.value, json!([1, null]));
    assert_eq!(result.actions.len(), 2);
    assert_eq!(result.actions[0].kind(), "bot_added");
    assert!(matches!(&result.actions[1], Action::BotUpdated { id, tags, .. } if id == "d" && tags["n"] == json!(2)));
    assert_eq!(runtime.bot_count(), 1);

    let result = runtime.execute("destroy(getBot('id', 'd'))").unwrap();
    assert_eq!(removed_ids(&result.actions), vec!["d"]);
    assert_eq!(runtime.bot_count(), 1);
}

#[test]
fn test_none_space_drops_writes() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("c").with_space(Space::certified()).with_tag("n", "1")]);
    let result = runtime
        .execute("const c = getBot('id', 'c'); c.tags.n = 2; return c.tags.n")
        .unwrap();
    assert_eq!(result.value, json!(1));
    assert!(result.actions.is_empty());
}

#[test]
fn test_swapped_provider_applies_to_the_next_entry() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("s").with_tag("n", "1")]);
    let bump = "const s = getBot('id', 's'); s.tags.n = s.tags.n + 1; return s.tags.n";
    assert_eq!(runtime.execute(bump).unwrap().value, json!(2));

    runtime.set_edit_mode_provider(Arc::new(|_: &Space| RealtimeEditMode::None));
    let result = runtime.execute(bump).unwrap();
    assert_eq!(result.value, json!(2));
    assert!(result.actions.is_empty());

    runtime.set_edit_mode_provider(Arc::new(DefaultEditModes));
    assert_eq!(runtime.execute(bump).unwrap().value, json!(3));
}

#[test]
fn test_syntax_errors_surface_when_tags_run() {
    let mut runtime = BotRuntime::default();
    let mut errors = runtime.subscribe_errors();
    let event = runtime.add_bots(vec![Bot::new("a")
        .with_tag("onBroken", "@let x = 1;\nx +* 2")
        .with_tag("bad", "=1 +")]);
    assert_eq!(event.added_bots, vec!["a".to_string()]);

    // the formula reads as its error and is reported on the error channel
    let reported = errors.try_recv().unwrap();
    assert_eq!(reported[0].name, "SyntaxError");
    assert_eq!(reported[0].tag.as_deref(), Some("bad"));
    assert!(matches!(
        runtime.bot("a").unwrap().tag("bad"),
        Value::Error(err) if err.name == "SyntaxError"
    ));

    let result = runtime.shout("onBroken", json!(null)).unwrap();
    assert!(result.results.is_empty());
    let record = &result.errors[0];
    assert_eq!(record.name, "SyntaxError");
    assert_eq!(record.bot.as_deref(), Some("a"));
    assert_eq!(record.tag.as_deref(), Some("onBroken"));
    assert_eq!(record.line, Some(2));
    assert!(record.column.is_some());
}

#[test]
fn test_runaway_recursion_is_a_script_error() {
    let deep = format!("={}1{}", "(".repeat(3_000), ")".repeat(3_000));
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a")
        .with_tag("recurse", "@function g(n) { return g(n + 1) } return g(0)")
        .with_tag("echo", "@shout('echo'); return 1")
        .with_tag("deep", deep)]);

    assert!(matches!(
        runtime.bot("a").unwrap().tag("deep"),
        Value::Error(err) if err.name == "SyntaxError"
    ));

    let result = runtime.shout("recurse", json!(null)).unwrap();
    assert!(result.results.is_empty());
    assert_eq!(result.errors[0].name, "RangeError");

    // the innermost shout fails, every outer level still answers
    let result = runtime.shout("echo", json!(null)).unwrap();
    assert_eq!(result.results, vec![json!(1)]);
    assert!(result.errors.iter().any(|e| e.name == "RangeError"));
}

#[test]
fn test_oversized_strings_fail_the_script_not_the_process() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a").with_tag("onPad", "@return 'abc'.padStart(1e12)")]);

    let result = runtime.execute("return 'abc'.padStart(1e12)");
    assert!(matches!(result, Err(RuntimeError::Script(message)) if message.contains("Invalid string length")));

    let result = runtime.shout("onPad", json!(null)).unwrap();
    assert!(result.results.is_empty());
    assert_eq!(result.errors[0].name, "RangeError");
}

#[test]
fn test_energy_limit_is_fatal_to_the_entry() {
    let config = RuntimeConfig {
        energy: 1_000,
        ..RuntimeConfig::default()
    };
    let mut runtime = BotRuntime::new(config);
    let mut actions = runtime.subscribe_actions();

    let result = runtime.execute("os.toast('before'); while (true) {}");
    assert!(matches!(result, Err(RuntimeError::OutOfEnergy)));
    assert_eq!(actions.try_recv().unwrap(), vec![Action::ShowToast { message: json!("before") }]);

    // try/catch cannot swallow exhaustion
    let result = runtime.execute("try { while (true) {} } catch (e) { os.toast('caught') }");
    assert!(matches!(result, Err(RuntimeError::OutOfEnergy)));
    assert!(actions.try_recv().is_err());

    // the next entry starts with a full budget
    assert_eq!(runtime.execute("return 1").unwrap().value, json!(1));
}

#[test]
fn test_whisper_follows_given_order() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![
        Bot::new("a").with_tag("who", "@return 'a'"),
        Bot::new("b").with_tag("who", "@return 'b'"),
        Bot::new("c").with_tag("who", "@return 'c'"),
    ]);
    let ids = ["c", "a", "missing", "b"].map(String::from);
    let result = runtime.whisper(&ids, "who", json!(null)).unwrap();
    assert_eq!(result.results, vec![json!("c"), json!("a"), json!("b")]);
}

#[test]
fn test_literal_coercion_round_trip() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a")
        .with_tag("x", "123.145")
        .with_tag("flag", "true")
        .with_tag("half", ".5")
        .with_tag("list", "[1, \"two\", =1+1]")]);

    let mut a = runtime.bot("a").unwrap();
    assert_eq!(a.tag("x"), Value::Number(123.145));
    assert_eq!(a.tag("flag"), Value::Bool(true));
    assert_eq!(a.tag("half"), Value::Number(0.5));
    assert_eq!(
        a.tag("list"),
        Value::Array(vec![Value::Number(1.0), Value::from("two"), Value::Number(2.0)])
    );

    a.set_tag("x", "hello").unwrap();
    assert_eq!(a.tag("x"), Value::from("hello"));
}

#[test]
fn test_config_tag_recalculates_transitively() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![
        Bot::new("cfg").with_tag("label", "hi"),
        Bot::new("a").with_tag("configBot", "cfg").with_tag("label", "=configTag + '!'"),
        Bot::new("b").with_tag("shout", "=getBot('id', 'a').tags.label.toUpperCase()"),
    ]);
    assert_eq!(runtime.bot("b").unwrap().tag("shout"), Value::from("HI!"));

    let event = runtime.update_bots(vec![BotUpdate::new("cfg").with_tag("label", "yo")]);
    assert_eq!(event.updated_bots, vec!["cfg".to_string(), "a".to_string(), "b".to_string()]);
    assert_eq!(event.value("a", "label"), Some(&json!("yo!")));
    assert_eq!(event.value("b", "shout"), Some(&json!("YO!")));
}

#[test]
fn test_listen_hooks_rewrite_responses() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![
        Bot::new("a")
            .with_tag("ping", "@return 1")
            .with_tag("onListen", "@that.responses.unshift(0)"),
        Bot::new("b").with_tag("ping", "@return 2"),
        Bot::new("hook").with_tag(
            "onAnyListen",
            "@if (that.name === 'ping') { that.responses.push(that.listeners.length) }",
        ),
    ]);
    let result = runtime.shout("ping", json!(null)).unwrap();
    assert_eq!(result.results, vec![json!(0), json!(1), json!(2), json!(2)]);
}

#[test]
fn test_listen_hooks_edit_responses_by_value() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![
        Bot::new("a").with_tag("ping", "@return 1"),
        Bot::new("copy").with_tag("onAnyListen", "@const r = that.responses; r.push(8)"),
        Bot::new("store").with_tag(
            "onAnyListen",
            "@const r = that.responses; r.push(9); that.responses = r",
        ),
    ]);
    // a local copy is detached until it is stored back on `that`
    let result = runtime.shout("ping", json!(null)).unwrap();
    assert_eq!(result.results, vec![json!(1), json!(9)]);
    assert!(result.errors.is_empty());
}

#[test]
fn test_task_resolution_runs_continuation() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a").with_tag(
        "ask",
        "@os.showInput('color?').then(color => { tags.color = color; return color })",
    )]);
    let result = runtime.shout("ask", json!(null)).unwrap();
    let task = match &result.actions[0] {
        Action::ShowInput { task_id, .. } => *task_id,
        other => panic!("unexpected {:?}", other),
    };

    let batches = runtime.async_result(task, json!("teal"), false);
    assert_eq!(batches.len(), 1);
    assert!(matches!(&batches[0].actions[0], Action::BotUpdated { tags, .. } if tags["color"] == json!("teal")));
    assert_eq!(runtime.bot("a").unwrap().tag("color"), Value::from("teal"));
}

#[test]
fn test_timers_and_sleep_share_the_clock() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a").with_tag(
        "go",
        "@setTimeout(() => os.toast('timeout'), 30); os.sleep(10).then(() => os.toast('slept'))",
    )]);
    runtime.shout("go", json!(null)).unwrap();

    let batches = runtime.advance_time(100);
    let toasts: Vec<_> = batches.iter().flat_map(|b| b.actions.clone()).collect();
    assert_eq!(
        toasts,
        vec![
            Action::ShowToast { message: json!("slept") },
            Action::ShowToast { message: json!("timeout") },
        ]
    );
    assert_eq!(runtime.now(), 100);
}

#[test]
fn test_batch_snapshot() {
    let mut runtime = BotRuntime::default();
    runtime.add_bots(vec![Bot::new("a").with_tag("go", "@os.toast('hi'); tags.count = 2;")]);
    let batch = runtime
        .process(vec![Action::Shout {
            name: "go".to_string(),
            bot_ids: None,
            argument: json!(null),
            task_id: None,
        }])
        .unwrap();

    insta::assert_snapshot!(serde_json::to_string_pretty(&batch).unwrap(), @r#"
    {
      "actions": [
        {
          "type": "show_toast",
          "message": "hi"
        },
        {
          "type": "bot_updated",
          "id": "a",
          "tags": {
            "count": 2
          }
        }
      ],
      "errors": []
    }
    "#);
}
