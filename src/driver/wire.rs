// ABOUTME: Bencoded TCP wire protocol (spec.md §6 "REPL wire protocol") —
// one dict-shaped request per op, answered with one or more dict-shaped
// responses and a final status list containing `done`. Grounded on the
// same session-holding-capability shape `Session`/`host.rs` already use;
// new here only because no prior module in this crate talks to a socket.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::driver::host::{HostCompiler, ProjectLoader};
use crate::driver::reload::{DependencyGraph, ReloadDebouncer, ReloadEngine};
use crate::driver::Session;
use crate::error::DriverError;

/// One incoming bencoded dict. Every field but `op` is optional — which
/// ones are populated depends on the op (spec.md §6's ops table).
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    pub op: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub ns: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One outgoing bencoded dict. Unset fields are omitted entirely rather
/// than encoded as bencode's nil-less dicts can't represent absence any
/// other way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WireResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_session: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completions: Vec<Candidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reloaded: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "type")]
    pub kind: String,
}

const RECOGNIZED_OPS: &[&str] = &[
    "clone",
    "close",
    "describe",
    "eval",
    "interrupt",
    "ls-sessions",
    "load-file",
    "completions",
    "reload",
    "reload-all",
    "watch-start",
    "watch-stop",
];

fn done(mut base: WireResponse) -> WireResponse {
    base.status.push("done".to_string());
    base
}

fn error_response(id: Option<String>, session: Option<String>, err: &DriverError) -> WireResponse {
    let frame = err.to_wire_frame();
    done(WireResponse {
        id,
        session,
        ex: Some(frame.kind.to_string()),
        err: Some(frame.message),
        status: vec!["eval-error".to_string()],
        ..Default::default()
    })
}

/// Holds every session live on this connection's server and the resources
/// shared across them: the host compiler, the namespace source loader, the
/// reload dependency graph, and the debounce/reload-mutex state (spec.md §5
/// "serialized through a reload mutex").
pub struct SessionTable {
    host: Rc<dyn HostCompiler>,
    loader: Rc<dyn ProjectLoader>,
    config: SessionConfig,
    sessions: RefCell<HashMap<String, Rc<Session>>>,
    graph: DependencyGraph,
    debouncer: ReloadDebouncer,
    watching: AtomicBool,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new(host: Rc<dyn HostCompiler>, loader: Rc<dyn ProjectLoader>, config: SessionConfig) -> Self {
        SessionTable {
            host,
            loader,
            config,
            sessions: RefCell::new(HashMap::new()),
            graph: DependencyGraph::new(),
            debouncer: ReloadDebouncer::new(),
            watching: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    fn fresh_session_id(&self) -> String {
        format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn create_session(&self) -> String {
        let id = self.fresh_session_id();
        let session = Rc::new(Session::new(self.host.clone(), self.config.initial_namespace.clone()));
        self.sessions.borrow_mut().insert(id.clone(), session);
        id
    }

    fn get(&self, id: &str) -> Option<Rc<Session>> {
        self.sessions.borrow().get(id).cloned()
    }

    fn reload_engine(&self) -> ReloadEngine<'_> {
        ReloadEngine {
            loader: self.loader.as_ref(),
            graph: &self.graph,
            debouncer: &self.debouncer,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Namespaces currently known to a session, for a watcher loop deciding
    /// which changed files map to which namespace (`watch::changed_namespaces`).
    pub fn namespaces_for(&self, session_id: &str) -> Vec<String> {
        self.get(session_id).map(|s| s.namespaces().names()).unwrap_or_default()
    }

    /// The seam a connection's watcher polling loop drives directly, bypassing
    /// the request/response framing `handle` uses for wire ops.
    pub fn trigger_reload(&self, session_id: &str, ns: &str, now: Instant) -> Option<crate::driver::reload::ReloadReport> {
        let session = self.get(session_id)?;
        self.reload_engine().notify_changed(&session, ns, now)
    }

    /// Dispatches one request to zero or more response dicts, always
    /// terminated by a `done` status (spec.md §6).
    pub fn handle(&self, req: WireRequest) -> Vec<WireResponse> {
        let id = req.id.clone();
        let sess_id = req.session.clone();
        match req.op.as_str() {
            "clone" => {
                let new_id = self.create_session();
                vec![done(WireResponse {
                    id,
                    new_session: Some(new_id),
                    ..Default::default()
                })]
            }
            "close" => {
                if let Some(sid) = &sess_id {
                    self.sessions.borrow_mut().remove(sid);
                }
                vec![done(WireResponse { id, session: sess_id, ..Default::default() })]
            }
            "describe" => vec![done(WireResponse {
                id,
                ops: RECOGNIZED_OPS.iter().map(|s| s.to_string()).collect(),
                version: Some(crate::config::VERSION.to_string()),
                ..Default::default()
            })],
            "ls-sessions" => vec![done(WireResponse {
                id,
                sessions: self.sessions.borrow().keys().cloned().collect(),
                ..Default::default()
            })],
            "eval" | "load-file" => self.handle_eval(id, sess_id, req.code.or(req.file)),
            "interrupt" => {
                if let Some(session) = sess_id.as_deref().and_then(|sid| self.get(sid)) {
                    session.interrupt();
                }
                vec![done(WireResponse { id, session: sess_id, ..Default::default() })]
            }
            "completions" => self.handle_completions(id, sess_id, req.prefix.unwrap_or_default()),
            "reload" => self.handle_reload(id, req.ns),
            "reload-all" => self.handle_reload_all(id),
            "watch-start" => {
                self.watching.store(true, Ordering::SeqCst);
                vec![done(WireResponse {
                    id,
                    value: Some(":watching".to_string()),
                    ..Default::default()
                })]
            }
            "watch-stop" => {
                self.watching.store(false, Ordering::SeqCst);
                vec![done(WireResponse {
                    id,
                    value: Some(":stopped".to_string()),
                    ..Default::default()
                })]
            }
            other => vec![done(error_response(id, sess_id, &DriverError::UnknownOp(other.to_string())))],
        }
    }

    fn handle_eval(&self, id: Option<String>, sess_id: Option<String>, code: Option<String>) -> Vec<WireResponse> {
        let Some(session) = sess_id.as_deref().and_then(|sid| self.get(sid)) else {
            return vec![done(error_response(id, sess_id, &DriverError::UnknownOp("no such session".to_string())))];
        };
        let Some(code) = code else {
            return vec![done(error_response(id, sess_id, &DriverError::UnknownOp("eval requires code".to_string())))];
        };
        match session.eval(&code) {
            Ok(outcome) => {
                let mut responses: Vec<WireResponse> = Vec::new();
                if !outcome.stdout.is_empty() {
                    responses.push(WireResponse {
                        id: id.clone(),
                        session: sess_id.clone(),
                        out: Some(outcome.stdout),
                        ..Default::default()
                    });
                }
                for value in outcome.values {
                    responses.push(WireResponse {
                        id: id.clone(),
                        session: sess_id.clone(),
                        value: Some(value),
                        ns: Some(outcome.namespace.clone()),
                        ..Default::default()
                    });
                }
                if responses.is_empty() {
                    responses.push(WireResponse { id: id.clone(), session: sess_id.clone(), ..Default::default() });
                }
                let last = responses.len() - 1;
                responses[last].status.push("done".to_string());
                responses
            }
            Err(e) => vec![error_response(id, sess_id, &e)],
        }
    }

    fn handle_completions(&self, id: Option<String>, sess_id: Option<String>, prefix: String) -> Vec<WireResponse> {
        let Some(session) = sess_id.as_deref().and_then(|sid| self.get(sid)) else {
            return vec![done(WireResponse { id, session: sess_id, ..Default::default() })];
        };
        let ns_name = session.current_namespace();
        let mut completions = Vec::new();
        if let Some(ns) = session.namespaces().get(&ns_name) {
            for name in ns.var_names() {
                if name.starts_with(&prefix) {
                    let kind = if ns.get_var(&name).map(|v| v.is_type).unwrap_or(false) { "type" } else { "var" };
                    completions.push(Candidate {
                        candidate: name,
                        kind: kind.to_string(),
                    });
                }
            }
        }
        vec![done(WireResponse {
            id,
            session: sess_id,
            completions,
            ..Default::default()
        })]
    }

    fn handle_reload(&self, id: Option<String>, ns: Option<String>) -> Vec<WireResponse> {
        let Some(ns) = ns else {
            return vec![done(error_response(id, None, &DriverError::UnknownOp("reload requires ns".to_string())))];
        };
        let Some((_, session)) = self.sessions.borrow().iter().next().map(|(k, v)| (k.clone(), v.clone())) else {
            return vec![done(error_response(id, None, &DriverError::UnknownOp("no active session to reload against".to_string())))];
        };
        let started = Instant::now();
        let report = self.reload_engine().reload_namespace(&session, &ns);
        let elapsed_ms = started.elapsed().as_millis();
        if report.errors.is_empty() {
            vec![done(WireResponse {
                id,
                value: Some(format!(":ok {elapsed_ms}")),
                reloaded: report.reloaded,
                ..Default::default()
            })]
        } else {
            let messages: Vec<String> = report.errors.iter().map(|(n, m)| format!("{n}: {m}")).collect();
            vec![done(WireResponse {
                id,
                value: Some(format!(":error {}", messages.join("; "))),
                reloaded: report.reloaded,
                ..Default::default()
            })]
        }
    }

    fn handle_reload_all(&self, id: Option<String>) -> Vec<WireResponse> {
        let Some((_, session)) = self.sessions.borrow().iter().next().map(|(k, v)| (k.clone(), v.clone())) else {
            return vec![done(error_response(id, None, &DriverError::UnknownOp("no active session to reload against".to_string())))];
        };
        let mut reloaded = Vec::new();
        let mut error_count = 0usize;
        for ns in session.namespaces().names() {
            let report = self.reload_engine().reload_namespace(&session, &ns);
            reloaded.extend(report.reloaded);
            error_count += report.errors.len();
        }
        let value = if error_count == 0 {
            format!(":ok {}", reloaded.len())
        } else {
            format!(":error {error_count} namespace(s) failed")
        };
        vec![done(WireResponse {
            id,
            value: Some(value),
            reloaded,
            ..Default::default()
        })]
    }
}

pub fn encode(response: &WireResponse) -> Result<Vec<u8>, serde_bencode::Error> {
    serde_bencode::to_bytes(response)
}

pub fn decode(bytes: &[u8]) -> Result<WireRequest, serde_bencode::Error> {
    serde_bencode::from_bytes(bytes)
}

/// Finds the end offset of the first complete bencoded value starting at
/// `buf[pos]` — bencode is self-delimiting (every string carries its own
/// byte length, every list/dict is closed by `e`), so a TCP stream can be
/// framed without a length prefix or a full parse. Returns `None` when the
/// buffer doesn't yet hold a complete value.
fn bencode_value_end(buf: &[u8], pos: usize) -> Option<usize> {
    match buf.get(pos)? {
        b'i' => {
            let rel = buf[pos..].iter().position(|&b| b == b'e')?;
            Some(pos + rel + 1)
        }
        b'l' | b'd' => {
            let mut i = pos + 1;
            loop {
                if *buf.get(i)? == b'e' {
                    return Some(i + 1);
                }
                i = bencode_value_end(buf, i)?;
            }
        }
        b'0'..=b'9' => {
            let rel = buf[pos..].iter().position(|&b| b == b':')?;
            let colon = pos + rel;
            let len: usize = std::str::from_utf8(&buf[pos..colon]).ok()?.parse().ok()?;
            let start = colon + 1;
            let end = start + len;
            if end > buf.len() {
                return None;
            }
            Some(end)
        }
        _ => None,
    }
}

/// Finds the end offset of the first complete bencoded value at the start of
/// `buf`, for a connection handler accumulating bytes off a socket one read
/// at a time.
pub fn split_first_value(buf: &[u8]) -> Option<usize> {
    bencode_value_end(buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::host::{MockHostCompiler, MockProjectLoader};

    fn table() -> SessionTable {
        SessionTable::new(Rc::new(MockHostCompiler::new()), Rc::new(MockProjectLoader::new()), SessionConfig::default())
    }

    #[test]
    fn clone_creates_a_usable_session() {
        let t = table();
        let responses = t.handle(WireRequest {
            op: "clone".to_string(),
            id: Some("1".to_string()),
            session: None,
            code: None,
            file: None,
            ns: None,
            prefix: None,
        });
        assert_eq!(responses.len(), 1);
        assert!(responses[0].new_session.is_some());
        assert!(responses[0].status.contains(&"done".to_string()));
    }

    #[test]
    fn eval_against_a_cloned_session_returns_a_value() {
        let t = table();
        let sid = t.create_session();
        let responses = t.handle(WireRequest {
            op: "eval".to_string(),
            id: Some("2".to_string()),
            session: Some(sid),
            code: Some("(def a 1)".to_string()),
            file: None,
            ns: None,
            prefix: None,
        });
        assert!(responses.iter().any(|r| r.value.is_some()));
        assert!(responses.last().unwrap().status.contains(&"done".to_string()));
    }

    #[test]
    fn eval_without_a_session_reports_an_error() {
        let t = table();
        let responses = t.handle(WireRequest {
            op: "eval".to_string(),
            id: None,
            session: None,
            code: Some("1".to_string()),
            file: None,
            ns: None,
            prefix: None,
        });
        assert_eq!(responses[0].status, vec!["eval-error".to_string()]);
    }

    #[test]
    fn describe_lists_every_recognized_op() {
        let t = table();
        let responses = t.handle(WireRequest {
            op: "describe".to_string(),
            id: None,
            session: None,
            code: None,
            file: None,
            ns: None,
            prefix: None,
        });
        assert_eq!(responses[0].ops.len(), RECOGNIZED_OPS.len());
    }

    #[test]
    fn unknown_op_reports_unknown_op_error() {
        let t = table();
        let responses = t.handle(WireRequest {
            op: "bogus".to_string(),
            id: None,
            session: None,
            code: None,
            file: None,
            ns: None,
            prefix: None,
        });
        assert_eq!(responses[0].ex.as_deref(), Some("UnknownOp"));
    }

    #[test]
    fn split_first_value_finds_one_dict_and_leaves_the_rest() {
        let mut buf = encode(&WireResponse {
            value: Some("ok".to_string()),
            ..Default::default()
        })
        .unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(b"i42e");
        assert_eq!(split_first_value(&buf), Some(first_len));
        assert_eq!(split_first_value(&buf[first_len..]), Some(4));
    }

    #[test]
    fn split_first_value_returns_none_on_a_truncated_buffer() {
        let buf = encode(&WireResponse {
            value: Some("ok".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(split_first_value(&buf[..buf.len() - 2]), None);
    }
}
