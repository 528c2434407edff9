//! 単独の準備確認
//!
//! バックエンドの初期化とホストの作成だけを行い、結果を1行の JSON で報告します。

use mojoprobe_target::{Backend, LifecycleGuard};
use serde::Serialize;
use std::io::Write;
use tracing::warn;

/// 準備完了のメッセージ
pub const READY_MESSAGE: &str = "mojo-repl-server ready";

#[derive(Debug, Serialize)]
struct StatusLine<'a> {
    status: &'a str,
    message: &'a str,
}

/// 準備確認を実行し、終了コードを返す
///
/// 成功時は `out` に状態行、`err` に作成成功の旨を書きます。
pub fn run_status_check<B: Backend, O: Write, E: Write>(backend: B, out: &mut O, err: &mut E) -> i32 {
    let mut guard = match LifecycleGuard::acquire(backend) {
        Ok(guard) => guard,
        Err(e) => {
            warn!("failed to initialize debugger backend: {}", e);
            let _ = writeln!(err, "Failed to initialize debugger backend: {}", e);
            return 1;
        }
    };

    let host = match guard.backend_mut().create_host() {
        Ok(host) => host,
        Err(e) => {
            warn!("host creation failed: {}", e);
            let _ = writeln!(err, "Failed to create debugger host");
            guard.release();
            return 1;
        }
    };
    let _ = writeln!(err, "debugger host created successfully");

    let line = StatusLine {
        status: "ok",
        message: READY_MESSAGE,
    };
    let code = match serde_json::to_string(&line) {
        Ok(json) => match writeln!(out, "{}", json).and_then(|_| out.flush()) {
            Ok(()) => 0,
            Err(e) => {
                let _ = writeln!(err, "Failed to write status: {}", e);
                1
            }
        },
        Err(e) => {
            let _ = writeln!(err, "Failed to encode status: {}", e);
            1
        }
    };

    guard.backend_mut().destroy_host(host);
    guard.release();
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use mojoprobe_target::{SimBackend, SimConfig};

    #[test]
    fn test_status_ok() {
        let backend = SimBackend::default();
        let ledger = backend.ledger();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run_status_check(backend, &mut out, &mut err);
        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"status\":\"ok\",\"message\":\"mojo-repl-server ready\"}\n"
        );
        assert!(String::from_utf8(err).unwrap().contains("debugger host created successfully"));
        assert_eq!(ledger.initialize_calls(), 1);
        assert_eq!(ledger.create_host_calls(), 1);
        assert_eq!(ledger.destroy_host_calls(), 1);
        assert_eq!(ledger.terminate_calls(), 1);
    }

    #[test]
    fn test_status_host_failure() {
        let backend = SimBackend::new(SimConfig {
            fail_host_creation: true,
            ..Default::default()
        });
        let ledger = backend.ledger();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run_status_check(backend, &mut out, &mut err);
        assert_eq!(code, 1);
        assert!(out.is_empty());
        assert!(String::from_utf8(err).unwrap().contains("Failed to create debugger host"));
        assert_eq!(ledger.destroy_host_calls(), 0);
        assert_eq!(ledger.terminate_calls(), 1);
    }
}
