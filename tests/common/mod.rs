//! In-memory JSSh shell for integration tests.
//!
//! The shell understands the request scripts the client sends (value
//! envelope, `typeof` check, assignment, store) and a tiny expression
//! language: JSON literals, object literals with bare keys, `a+b`,
//! globals, member and subscript access, and calls to a few built-in
//! functions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use firefox_jssh::assets::WELCOME_LINE;
use firefox_jssh::protocol::envelope::{
    ASSIGN_CLOSE, ASSIGN_MIDDLE, ASSIGN_OPEN, HELPER_VALUE_CLOSE, HELPER_VALUE_OPEN, STORE_CLOSE,
    STORE_MIDDLE, STORE_OPEN, TYPE_CLOSE, TYPE_OPEN, VALUE_CLOSE, VALUE_OPEN,
};
use firefox_jssh::transport::PROMPT;
use firefox_jssh::{Connection, ConnectionOptions};

// ============================================================================
// Constants
// ============================================================================

/// Function expression bumping the global `counter`.
pub const COUNTER_FN: &str = "(function(){counter++; return counter;})";

const COUNTER_BODY: &str = "function(){counter++; return counter;}";

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());
static SUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(-?\d+)\s*\+\s*(-?\d+)$").unwrap());
static MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\.([A-Za-z_$][A-Za-z0-9_$]*)$").unwrap());
static SUBSCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\[([^\[\]]+)\]$").unwrap());
static SCRATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^typeof ([A-Za-z_$][A-Za-z0-9_$]*)=="object""#).unwrap());
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,])\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*:").unwrap());

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
enum Js {
    Undefined,
    Value(Value),
    Function(&'static str),
}

/// Thrown exception: name and message.
type Thrown = (String, String);

type Outcome = Result<Js, Thrown>;

fn thrown(name: &str, message: impl Into<String>) -> Thrown {
    (name.to_string(), message.into())
}

/// Shell behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellConfig {
    /// Write every reply in two chunks, split mid-reply.
    pub chunked: bool,
    /// Report this many store attempts as collisions first.
    pub taken_slots: usize,
    /// Connect with the helper library.
    pub extension: bool,
}

#[derive(Debug)]
struct State {
    globals: HashMap<String, Js>,
    taken_slots: usize,
    calls: usize,
}

/// Handle to a running mock shell.
#[derive(Clone)]
pub struct MockShell {
    state: Arc<Mutex<State>>,
}

// ============================================================================
// Setup
// ============================================================================

/// Installs a test log subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a mock shell and connects to it.
pub async fn connect(config: ShellConfig) -> (Connection, MockShell) {
    init_tracing();

    let (client, server) = duplex(64 * 1024);
    let shell = MockShell::spawn(server, config);

    let mut options = ConnectionOptions::new()
        .with_read_timeout(Duration::from_secs(5))
        .with_settle_timeout(Duration::from_millis(200));
    if config.extension {
        options = options.with_extension();
    }

    let connection = Connection::from_stream(client, options)
        .await
        .expect("handshake with mock shell");
    (connection, shell)
}

impl MockShell {
    fn spawn(server: DuplexStream, config: ShellConfig) -> Self {
        let mut globals = HashMap::new();
        globals.insert("counter".to_string(), Js::Value(json!(0)));
        for name in ["makePoint", "thrower", "nothing", "add"] {
            globals.insert(name.to_string(), Js::Function(name));
        }

        let shell = Self {
            state: Arc::new(Mutex::new(State {
                globals,
                taken_slots: config.taken_slots,
                calls: 0,
            })),
        };

        let state = Arc::clone(&shell.state);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            let welcome = format!("{WELCOME_LINE}\n{PROMPT}");
            if write.write_all(welcome.as_bytes()).await.is_err() {
                return;
            }

            while let Ok(Some(line)) = lines.next_line().await {
                let reply = state.lock().respond(&line).into_bytes();
                let written = if config.chunked {
                    let (head, tail) = reply.split_at(reply.len() / 2);
                    let head = write.write_all(head).await;
                    let _ = write.flush().await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    head.and(write.write_all(tail).await)
                } else {
                    write.write_all(&reply).await
                };
                if written.is_err() {
                    return;
                }
            }
        });

        shell
    }

    /// Number of built-in function calls executed so far.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    /// Reads a global as JSON; `None` if unset or not JSON.
    pub fn global(&self, name: &str) -> Option<Value> {
        match self.state.lock().globals.get(name) {
            Some(Js::Value(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Sets a global.
    pub fn set_global(&self, name: &str, value: Value) {
        self.state
            .lock()
            .globals
            .insert(name.to_string(), Js::Value(value));
    }
}

// ============================================================================
// Request Handling
// ============================================================================

impl State {
    fn respond(&mut self, line: &str) -> String {
        if line.starts_with("var __jsshHelper") || line.starts_with("__jsshHelper.stringify") {
            return format!("done!{PROMPT}");
        }

        let wrapped = line
            .strip_prefix(VALUE_OPEN)
            .and_then(|rest| rest.strip_suffix(VALUE_CLOSE))
            .or_else(|| {
                line.strip_prefix(HELPER_VALUE_OPEN)
                    .and_then(|rest| rest.strip_suffix(HELPER_VALUE_CLOSE))
            });

        match wrapped {
            Some(expr) if expr.trim_end().ends_with('+') => {
                format!("SyntaxError: syntax error{PROMPT}")
            }
            Some(expr) => {
                let payload = envelope(self.request(expr));
                let units = payload.encode_utf16().count();
                format!("{units}\n{payload}{PROMPT}")
            }
            None if line.trim_end().ends_with('+') => {
                format!("SyntaxError: syntax error{PROMPT}")
            }
            None => {
                let text = match self.eval(line) {
                    Ok(Js::Value(Value::String(text))) => text,
                    Ok(Js::Value(value)) => value.to_string(),
                    Ok(Js::Undefined) => "undefined".to_string(),
                    Ok(Js::Function(name)) => format!("function {name}() {{}}"),
                    Err((name, message)) => format!("{name}: {message}"),
                };
                format!("{text}{PROMPT}")
            }
        }
    }

    fn request(&mut self, expr: &str) -> Outcome {
        if let Some(rest) = expr.strip_prefix(TYPE_OPEN) {
            let target = rest
                .strip_suffix(TYPE_CLOSE)
                .ok_or_else(|| thrown("SyntaxError", "bad typeof check"))?;
            return self.type_of(target).map(|tag| Js::Value(Value::String(tag)));
        }

        if let Some(rest) = expr.strip_prefix(ASSIGN_OPEN) {
            let (target, value) = rest
                .split_once(ASSIGN_MIDDLE)
                .and_then(|(target, rest)| Some((target, rest.strip_suffix(ASSIGN_CLOSE)?)))
                .ok_or_else(|| thrown("SyntaxError", "bad assignment"))?;
            return self.assign(target, value);
        }

        if let Some(rest) = expr.strip_prefix(STORE_OPEN) {
            let (source, args) = rest
                .split_once(STORE_MIDDLE)
                .and_then(|(source, rest)| Some((source, rest.strip_suffix(STORE_CLOSE)?)))
                .ok_or_else(|| thrown("SyntaxError", "bad store"))?;
            return self.store(source, args);
        }

        self.eval(expr)
    }

    fn type_of(&mut self, expr: &str) -> Result<String, Thrown> {
        let tag = match self.eval(expr) {
            Err(e) => return Err(e),
            Ok(Js::Undefined) => "undefined",
            Ok(Js::Function(_)) => "function",
            Ok(Js::Value(Value::Null)) => "null",
            Ok(Js::Value(Value::Bool(_))) => "boolean",
            Ok(Js::Value(Value::Number(_))) => "number",
            Ok(Js::Value(Value::String(_))) => "string",
            Ok(Js::Value(_)) => "object",
        };
        Ok(tag.to_string())
    }

    fn assign(&mut self, target: &str, value: &str) -> Outcome {
        let value = self.eval(value)?;

        let field = MEMBER
            .captures(target)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .or_else(|| {
                let caps = SUBSCRIPT.captures(target)?;
                let key: String = serde_json::from_str(&caps[2]).ok()?;
                Some((caps[1].to_string(), key))
            });
        if let Some((base, name)) = field {
            if let Some(Js::Value(Value::Object(fields))) = self.globals.get_mut(&base) {
                if let Js::Value(value) = value {
                    fields.insert(name, value);
                } else {
                    fields.remove(&name);
                }
                return Ok(Js::Value(Value::Null));
            }
        }

        if IDENT.is_match(target) {
            let prefix = format!("{target}[");
            self.globals.retain(|key, _| !key.starts_with(&prefix));
        }
        self.globals.insert(target.to_string(), value);
        Ok(Js::Value(Value::Null))
    }

    fn store(&mut self, source: &str, args: &str) -> Outcome {
        let (container, key) = args
            .rsplit_once(',')
            .ok_or_else(|| thrown("SyntaxError", "bad store arguments"))?;

        let base = match SCRATCH.captures(unwrap_parens(container)) {
            Some(caps) => {
                let name = caps[1].to_string();
                self.scratch(&name);
                name
            }
            None => container.to_string(),
        };

        let slot = format!("{base}[{key}]");
        if self.taken_slots > 0 {
            self.taken_slots -= 1;
            return Ok(Js::Value(Value::Bool(false)));
        }
        if self.globals.contains_key(&slot) {
            return Ok(Js::Value(Value::Bool(false)));
        }

        let value = self.eval(source)?;
        self.globals.insert(slot, value);
        Ok(Js::Value(Value::Bool(true)))
    }

    /// Yields the scratch container `name`, creating it if needed.
    fn scratch(&mut self, name: &str) -> Js {
        self.globals
            .entry(name.to_string())
            .or_insert_with(|| Js::Value(Value::Object(Map::new())))
            .clone()
    }
}

// ============================================================================
// Expressions
// ============================================================================

impl State {
    fn eval(&mut self, expr: &str) -> Outcome {
        let expr = unwrap_parens(expr.trim());

        if let Ok(value) = serde_json::from_str::<Value>(expr) {
            return Ok(Js::Value(value));
        }
        if expr.starts_with('{') || expr.starts_with('[') {
            let json = BARE_KEY.replace_all(&expr.replace('\'', "\""), "$1\"$2\":").into_owned();
            if let Ok(value) = serde_json::from_str::<Value>(&json) {
                return Ok(Js::Value(value));
            }
        }
        if let Some(caps) = SUM.captures(expr) {
            let a: i64 = caps[1].parse().unwrap_or_default();
            let b: i64 = caps[2].parse().unwrap_or_default();
            return Ok(Js::Value(json!(a + b)));
        }
        if let Some(js) = self.globals.get(expr) {
            return Ok(js.clone());
        }
        if let Some(caps) = SCRATCH.captures(expr) {
            return Ok(self.scratch(&caps[1]));
        }

        if let Some((callee, args)) = split_call(expr) {
            let args: Vec<Value> = serde_json::from_str(&format!("[{args}]"))
                .map_err(|_| thrown("SyntaxError", "unsupported arguments"))?;
            let callee = unwrap_parens(callee);
            if callee == COUNTER_BODY {
                return self.call(COUNTER_BODY, &args);
            }
            return match self.eval(callee)? {
                Js::Function(name) => self.call(name, &args),
                _ => Err(thrown("TypeError", format!("{callee} is not a function"))),
            };
        }

        if let Some(caps) = MEMBER.captures(expr) {
            let base = self.eval(&caps[1])?;
            return member(base, &caps[1], &caps[2]);
        }
        if let Some(caps) = SUBSCRIPT.captures(expr) {
            let base = self.eval(&caps[1])?;
            let key: Value = serde_json::from_str(&caps[2])
                .map_err(|_| thrown("SyntaxError", "unsupported subscript"))?;
            return subscript(base, &caps[1], &key);
        }
        if IDENT.is_match(expr) {
            return Err(thrown("ReferenceError", format!("{expr} is not defined")));
        }

        Err(thrown("SyntaxError", format!("unsupported expression {expr}")))
    }

    fn call(&mut self, name: &'static str, args: &[Value]) -> Outcome {
        self.calls += 1;
        match name {
            COUNTER_BODY => {
                let next = match self.globals.get("counter") {
                    Some(Js::Value(value)) => value.as_i64().unwrap_or_default() + 1,
                    _ => 1,
                };
                self.globals.insert("counter".to_string(), Js::Value(json!(next)));
                Ok(Js::Value(json!(next)))
            }
            "makePoint" => Ok(Js::Value(json!({
                "x": args.first().cloned().unwrap_or(Value::Null),
                "y": args.get(1).cloned().unwrap_or(Value::Null),
            }))),
            "thrower" => Err(thrown("TypeError", "boom")),
            "nothing" => Ok(Js::Undefined),
            "add" => Ok(Js::Value(json!(
                args.iter().filter_map(Value::as_i64).sum::<i64>()
            ))),
            other => Err(thrown("TypeError", format!("{other} is not callable"))),
        }
    }
}

fn member(base: Js, base_text: &str, name: &str) -> Outcome {
    match base {
        Js::Undefined => Err(thrown("TypeError", format!("{base_text} is undefined"))),
        Js::Value(Value::Null) => Err(thrown("TypeError", format!("{base_text} is null"))),
        Js::Value(Value::Object(fields)) => Ok(fields
            .get(name)
            .cloned()
            .map_or(Js::Undefined, Js::Value)),
        Js::Value(Value::String(text)) if name == "length" => {
            Ok(Js::Value(json!(text.encode_utf16().count())))
        }
        Js::Value(Value::Array(items)) if name == "length" => Ok(Js::Value(json!(items.len()))),
        _ => Ok(Js::Undefined),
    }
}

fn subscript(base: Js, base_text: &str, key: &Value) -> Outcome {
    match (base, key) {
        (Js::Value(Value::Array(items)), Value::Number(index)) => Ok(index
            .as_u64()
            .and_then(|index| items.get(index as usize).cloned())
            .map_or(Js::Undefined, Js::Value)),
        (base, Value::String(name)) => member(base, base_text, name),
        (Js::Undefined, _) => Err(thrown("TypeError", format!("{base_text} is undefined"))),
        _ => Ok(Js::Undefined),
    }
}

fn envelope(outcome: Outcome) -> String {
    match outcome {
        Ok(Js::Value(value)) => json!({"errored": false, "value": value}),
        Ok(Js::Undefined | Js::Function(_)) => json!({"errored": false}),
        Err((name, message)) => json!({
            "errored": true,
            "value": {"name": name, "message": message, "stack": null}
        }),
    }
    .to_string()
}

// ============================================================================
// Parsing Helpers
// ============================================================================

/// Index of the `)` matching the `(` at `open`, skipping string literals.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in text.char_indices().skip_while(|(i, _)| *i < open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips parentheses wrapping the whole expression.
fn unwrap_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && matching_paren(expr, 0) == Some(expr.len() - 1) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

/// Splits `callee(args)` where the argument list closes the expression.
fn split_call(expr: &str) -> Option<(&str, &str)> {
    if !expr.ends_with(')') {
        return None;
    }
    let last = expr.len() - 1;

    let mut search = 0;
    while let Some(offset) = expr[search..].find('(') {
        let open = search + offset;
        let close = matching_paren(expr, open)?;
        if close == last {
            return (open > 0).then(|| (&expr[..open], &expr[open + 1..last]));
        }
        search = close + 1;
    }
    None
}
