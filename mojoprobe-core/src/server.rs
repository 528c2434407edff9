//! JSON 行プロトコルのサーバ
//!
//! 1行に1つの要求を読み、1行に1つの応答を書きます。評価は REPL 経路で行います。
//! 評価エンジン自体の失敗は `REPLError`（エンジン喪失）と `TimeoutError`（応答なし）として、
//! 断片のエラーとは区別して返します。

use crate::config::SessionConfig;
use crate::diagnostics::{char_slice, identifier_span, Diagnostic};
use crate::evaluator::EvalMode;
use crate::session::Session;
use crate::Result;
use mojoprobe_target::{Backend, FailureKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// 要求
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    Execute {
        id: u64,
        #[serde(default)]
        code: String,
    },
    Complete {
        id: u64,
        #[serde(default)]
        code: String,
        #[serde(default)]
        cursor_pos: usize,
    },
    Interrupt {
        id: u64,
    },
    Restart {
        id: u64,
    },
    Shutdown {
        id: u64,
    },
}

/// 応答
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_end: Option<usize>,
}

impl Reply {
    fn ok(id: Option<u64>) -> Self {
        Self {
            id,
            status: "ok".to_string(),
            ..Default::default()
        }
    }

    fn error(id: Option<u64>, diagnostic: Diagnostic) -> Self {
        Self {
            id,
            status: "error".to_string(),
            ename: Some(diagnostic.ename),
            evalue: Some(diagnostic.evalue),
            traceback: Some(diagnostic.traceback),
            ..Default::default()
        }
    }
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:var|let|alias|fn|def|struct)\s+([A-Za-z_]\w*)").unwrap()
    })
}

pub struct Server<B: Backend> {
    session: Session<B>,
    /// 再起動のたびに新しいバックエンドを作る
    factory: Box<dyn FnMut() -> B>,
    /// 成功した断片で宣言された名前（補完候補）
    declared: BTreeSet<String>,
}

/// セッションを立ち上げて推論対象プロセスを起動する
fn open_session<B: Backend>(backend: B, config: SessionConfig) -> Result<Session<B>> {
    let (mut session, bootstrap) = Session::bootstrap(backend, config)?;
    if !bootstrap.plugin_loaded {
        info!("plugin not loaded; evaluations will fail: {}", bootstrap.plugin_error.trim());
    }
    session.launch()?;
    Ok(session)
}

impl<B: Backend> Server<B> {
    /// `factory` で作ったバックエンドでセッションを始める
    ///
    /// `restart` 要求を受けると `factory` をもう一度呼んでセッションを作り直します。
    pub fn start<F>(mut factory: F, config: SessionConfig) -> Result<Self>
    where
        F: FnMut() -> B + 'static,
    {
        let session = open_session(factory(), config)?;
        Ok(Self {
            session,
            factory: Box::new(factory),
            declared: BTreeSet::new(),
        })
    }

    /// 準備完了を通知し、`shutdown` か入力の終わりまで要求を処理する
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        writeln!(output, "{}", serde_json::json!({ "status": "ready" }))?;
        output.flush()?;

        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (reply, shutdown) = self.handle_line(&line);
            writeln!(output, "{}", serde_json::to_string(&reply)?)?;
            output.flush()?;
            if shutdown {
                break;
            }
        }

        self.session.teardown();
        Ok(())
    }

    /// 1行の要求を処理する（戻り値の真偽は終了要求かどうか）
    pub fn handle_line(&mut self, line: &str) -> (Reply, bool) {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return (
                    Reply::error(None, Diagnostic::protocol(format!("invalid JSON: {}", e))),
                    false,
                )
            }
        };
        let id = value.get("id").and_then(|v| v.as_u64());

        match serde_json::from_value::<Request>(value.clone()) {
            Ok(request) => self.handle(request),
            Err(_) => {
                let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
                let message = format!("unknown request type: '{}'", kind);
                (Reply::error(id, Diagnostic::protocol(message)), false)
            }
        }
    }

    pub fn handle(&mut self, request: Request) -> (Reply, bool) {
        match request {
            Request::Execute { id, code } => (self.execute(id, &code), false),
            Request::Complete {
                id,
                code,
                cursor_pos,
            } => (self.complete(id, &code, cursor_pos), false),
            Request::Interrupt { id } => (self.interrupt(id), false),
            Request::Restart { id } => (self.restart(id), false),
            Request::Shutdown { id } => {
                debug!("shutdown requested");
                (Reply::ok(Some(id)), true)
            }
        }
    }

    fn execute(&mut self, id: u64, code: &str) -> Reply {
        let result = self.session.evaluate_fragment(code, EvalMode::Repl);
        let mut reply = if result.succeeded {
            for caps in declaration_re().captures_iter(code) {
                self.declared.insert(caps[1].to_string());
            }
            Reply::ok(Some(id))
        } else {
            Reply::error(
                Some(id),
                Diagnostic::from_failure(result.failure, &result.error_message),
            )
        };
        reply.stdout = Some(result.captured_stdout);
        reply.stderr = Some(result.captured_stderr);
        reply
    }

    /// 実行中の評価を中断する
    fn interrupt(&mut self, id: u64) -> Reply {
        match self.session.interrupt() {
            Ok(()) => Reply::ok(Some(id)),
            Err(e) => {
                warn!("interrupt failed: {:#}", e);
                Reply::error(
                    Some(id),
                    Diagnostic::from_failure(FailureKind::EngineLost, &format!("{:#}", e)),
                )
            }
        }
    }

    /// セッションを破棄して新しいバックエンドで作り直す
    ///
    /// 宣言済みの名前は忘れます。作り直しに失敗した場合、以降の評価は失敗します。
    fn restart(&mut self, id: u64) -> Reply {
        info!("restarting session");
        self.session.teardown();
        self.declared.clear();
        let config = self.session.config().clone();
        match open_session((self.factory)(), config) {
            Ok(session) => {
                self.session = session;
                Reply::ok(Some(id))
            }
            Err(e) => {
                warn!("restart failed: {:#}", e);
                Reply::error(
                    Some(id),
                    Diagnostic::from_failure(FailureKind::EngineLost, &format!("{:#}", e)),
                )
            }
        }
    }

    /// `cursor_pos` と応答の範囲は文字単位
    fn complete(&self, id: u64, code: &str, cursor_pos: usize) -> Reply {
        let (start, end) = identifier_span(code, cursor_pos);
        let prefix = char_slice(code, start, end);
        let completions = if prefix.is_empty() {
            Vec::new()
        } else {
            self.declared
                .iter()
                .filter(|name| name.starts_with(prefix.as_str()) && name.as_str() != prefix)
                .cloned()
                .collect()
        };
        Reply {
            completions: Some(completions),
            cursor_start: Some(start),
            cursor_end: Some(end),
            ..Reply::ok(Some(id))
        }
    }

    pub fn session(&mut self) -> &mut Session<B> {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        let r: Request = serde_json::from_str(r#"{"type":"execute","id":1,"code":"print(1)"}"#).unwrap();
        assert_eq!(
            r,
            Request::Execute {
                id: 1,
                code: "print(1)".to_string()
            }
        );
        let r: Request =
            serde_json::from_str(r#"{"type":"complete","id":4,"code":"pri","cursor_pos":3}"#).unwrap();
        assert_eq!(
            r,
            Request::Complete {
                id: 4,
                code: "pri".to_string(),
                cursor_pos: 3
            }
        );
        let r: Request = serde_json::from_str(r#"{"type":"shutdown","id":9}"#).unwrap();
        assert_eq!(r, Request::Shutdown { id: 9 });
        let r: Request = serde_json::from_str(r#"{"type":"interrupt","id":10}"#).unwrap();
        assert_eq!(r, Request::Interrupt { id: 10 });
        let r: Request = serde_json::from_str(r#"{"type":"restart","id":11}"#).unwrap();
        assert_eq!(r, Request::Restart { id: 11 });
        assert!(serde_json::from_str::<Request>(r#"{"type":"bogus","id":6}"#).is_err());
    }

    #[test]
    fn test_reply_skips_empty_fields() {
        let json = serde_json::to_string(&Reply::ok(Some(3))).unwrap();
        assert_eq!(json, r#"{"id":3,"status":"ok"}"#);
    }

    #[test]
    fn test_declaration_names() {
        let code = "var a = 1\nfn add(a: Int) -> Int:\n    return a";
        let names: Vec<&str> = declaration_re()
            .captures_iter(code)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(names, vec!["a", "add"]);
    }
}
