use loopscope::event::{ConsoleLevel, Event};
use loopscope::harness::{Harness, HarnessOptions, Termination};
use loopscope::runtime::SandboxIo;
use serde_json::Value as JsonValue;

fn execute(code: &str) -> (Termination, Vec<Event>) {
    let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
    let control = harness.control();
    let (outcome, events) = harness.run_to_vec(code, &control);
    (outcome.termination, events)
}

fn lines(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Console { args, .. } => Some(
                args.iter()
                    .map(|arg| match arg {
                        JsonValue::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
        .collect()
}

/// Runs `code` to completion and returns its console output.
fn output(code: &str) -> Vec<String> {
    let (termination, events) = execute(code);
    assert_eq!(termination, Termination::Completed, "output: {:?}", lines(&events));
    lines(&events)
}

fn runtime_error(events: &[Event]) -> Option<&str> {
    events.iter().find_map(|event| match event {
        Event::RuntimeError { message, .. } => Some(message.as_str()),
        _ => None,
    })
}

#[test]
fn closures_keep_their_own_state() {
    let out = output(
        "function counter() { let n = 0; return () => ++n; }\n\
         const a = counter();\n\
         const b = counter();\n\
         a(); a();\n\
         console.log(`${a()} ${b()}`);",
    );
    assert_eq!(out, ["3 1"]);
}

#[test]
fn loops_with_break_and_continue() {
    let out = output(
        "let total = 0;\n\
         for (let i = 1; i <= 10; i++) { if (i === 3) continue; if (i > 5) break; total += i; }\n\
         let w = 0;\n\
         while (w < 4) { w++; }\n\
         const seen = [];\n\
         for (const x of ['a', 'b']) seen.push(x);\n\
         console.log(total, w, seen.join('-'));",
    );
    assert_eq!(out, ["12 4 a-b"]);
}

#[test]
fn array_and_string_helpers() {
    let out = output(
        "const xs = [1, 2, 3, 4];\n\
         const doubled = xs.map(x => x * 2).filter(x => x > 2);\n\
         const sum = xs.reduce((acc, x) => acc + x, 0);\n\
         console.log(doubled.join(','), sum, xs.indexOf(3), xs.includes(9));\n\
         console.log('Loop'.toUpperCase(), ' pad '.trim(), 'a,b'.split(',').length, 'x'.padStart(3, '.'));",
    );
    assert_eq!(out, ["4,6,8 10 2 false", "LOOP pad 2 ..x"]);
}

#[test]
fn objects_templates_and_operators() {
    let out = output(
        "const user = { name: 'ada', langs: ['rust'] };\n\
         user.age = 36;\n\
         const label = user.age >= 18 ? 'adult' : 'minor';\n\
         const missing = user.nickname ?? 'none';\n\
         console.log(`${user.name}:${label}:${missing}:${typeof user.langs}`);\n\
         console.log(JSON.stringify({ a: 1, b: [true, null] }));\n\
         console.log(JSON.parse('{\"k\": 5}').k + 1, Math.max(3, 9, 4), 7 % 4);",
    );
    assert_eq!(out, ["ada:adult:none:object", "{\"a\":1,\"b\":[true,null]}", "6 9 3"]);
}

#[test]
fn try_catch_finally_sees_thrown_errors() {
    let out = output(
        "function risky() { throw new TypeError('bad input'); }\n\
         try { risky(); } catch (e) { console.log(e.name, e.message); } finally { console.log('cleanup'); }\n\
         try { undefinedThing(); } catch (e) { console.log(e.message); }",
    );
    assert_eq!(
        out,
        ["TypeError bad input", "cleanup", "undefinedThing is not defined"]
    );
}

#[test]
fn const_reassignment_is_a_type_error() {
    let out = output("const k = 1;\ntry { k = 2; } catch (e) { console.log(e.message); }");
    assert_eq!(out, ["Assignment to constant variable."]);
}

#[test]
fn promise_chains_pass_values_along() {
    let out = output(
        "new Promise(resolve => setTimeout(() => resolve(1), 5))\n\
           .then(v => v + 1)\n\
           .then(v => { throw new Error(`at ${v}`); })\n\
           .catch(e => e.message)\n\
           .finally(() => console.log('settled'))\n\
           .then(v => console.log(v));",
    );
    assert_eq!(out, ["settled", "at 2"]);
}

#[test]
fn console_levels_are_kept() {
    let (_, events) = execute("console.warn('careful');\nconsole.error('broken');");
    let levels: Vec<ConsoleLevel> = events
        .iter()
        .filter_map(|event| match event {
            Event::Console { level, .. } => Some(*level),
            _ => None,
        })
        .collect();
    assert_eq!(levels, [ConsoleLevel::Warn, ConsoleLevel::Error]);
}

#[test]
fn modules_load_through_import_and_require() {
    let out = output(
        "import fs from 'node:fs';\n\
         const net = require('net');\n\
         const server = net.createServer();\n\
         server.on('close', () => console.log('closed'));\n\
         server.close();\n\
         console.log(typeof fs.readFile);",
    );
    assert_eq!(out, ["function", "closed"]);
}

#[test]
fn unknown_modules_throw() {
    let (termination, events) = execute("require('child_process');");
    assert_eq!(termination, Termination::UncaughtError);
    assert_eq!(
        runtime_error(&events),
        Some("Cannot find module 'child_process'")
    );
}

#[test]
fn errors_in_callbacks_fail_the_run() {
    let (termination, events) = execute(
        "setTimeout(() => { null.x; }, 1);\nsetTimeout(() => console.log('never'), 2);",
    );
    assert_eq!(termination, Termination::UncaughtError);
    assert!(runtime_error(&events).is_some());
    assert!(lines(&events).is_empty());
    assert!(events.last().is_some_and(Event::is_script_end));
}

#[test]
fn async_functions_are_rejected_at_parse_time() {
    let (termination, events) = execute("async function load() { return 1; }");
    assert_eq!(termination, Termination::SyntaxError);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::TsDiagnostic { diagnostics, .. }
            if diagnostics.iter().any(|d| d.message.contains("async/await"))
    )));
}

#[test]
fn runaway_recursion_is_reported() {
    let options = HarnessOptions {
        max_call_depth: 64,
        ..HarnessOptions::default()
    };
    let mut harness = Harness::new(options, Box::new(SandboxIo::denied()));
    let control = harness.control();
    let (outcome, events) =
        harness.run_to_vec("function down(n) { return down(n + 1); }\ndown(0);", &control);
    let termination = outcome.termination;
    assert_eq!(termination, Termination::UncaughtError);
    assert_eq!(
        runtime_error(&events),
        Some("Maximum call stack size exceeded")
    );
}

#[test]
fn oversized_arrays_throw_a_range_error() {
    let out = output(
        "const a = [];\n\
         try { a[1e15] = 1; } catch (e) { console.log(e.name, e.message); }\n\
         try { a.length = 1e15; } catch (e) { console.log(e.name, e.message); }\n\
         a[2] = 'x';\n\
         a.length = 4;\n\
         console.log(a.length);",
    );
    assert_eq!(
        out,
        [
            "RangeError Invalid array length",
            "RangeError Invalid array length",
            "4"
        ]
    );
}

#[test]
fn uncaught_oversized_array_still_ends_the_script() {
    let (termination, events) = execute("const a = [];\na[1e15] = 1;\nconsole.log('unreachable');");
    assert_eq!(termination, Termination::UncaughtError);
    assert_eq!(runtime_error(&events), Some("Invalid array length"));
    assert!(lines(&events).is_empty());
    assert!(events.last().is_some_and(Event::is_script_end));
}

#[test]
fn huge_pad_targets_are_rejected() {
    let out = output(
        "for (const pad of [s => s.padStart(1e15), s => s.padEnd(Infinity, '-')]) {\n\
           try { pad('x'); } catch (e) { console.log(e.name, e.message); }\n\
         }\n\
         console.log('ab'.padEnd(4, '-'), 'ab'.padStart(-3), 'ab'.padStart(NaN));",
    );
    assert_eq!(
        out,
        [
            "RangeError Invalid string length",
            "RangeError Invalid string length",
            "ab-- ab ab"
        ]
    );
}
