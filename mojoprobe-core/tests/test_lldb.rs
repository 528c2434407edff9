//! 実際の lldb と言語プラグインを使うテスト
//!
//! `MOJOPROBE_ROOT` にインストールルートを設定して `cargo test -- --ignored` で実行します。

use mojoprobe_core::status::run_status_check;
use mojoprobe_core::{EvalMode, ModularRoot, Session, SessionConfig};
use mojoprobe_target::{LldbBackend, LldbConfig};
use std::time::Duration;

fn root() -> ModularRoot {
    let root = std::env::var("MOJOPROBE_ROOT").unwrap_or_else(|_| "/opt/modular".to_string());
    ModularRoot::new(root)
}

fn backend() -> LldbBackend {
    LldbBackend::new(LldbConfig {
        response_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    })
}

#[test]
#[ignore]
fn test_lldb_status() {
    let mut out = Vec::new();
    let mut err = Vec::new();
    assert_eq!(run_status_check(backend(), &mut out, &mut err), 0);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"status\":\"ok\",\"message\":\"mojo-repl-server ready\"}\n"
    );
}

#[test]
#[ignore]
fn test_lldb_repl_mode_sequence() {
    let root = root();
    root.export_environment();
    let (mut session, report) = Session::bootstrap(backend(), SessionConfig::for_root(root)).unwrap();
    assert!(report.plugin_loaded);
    session.launch().unwrap();

    let results: Vec<_> = ["var x = 42", "print(x)", "x = 99", "print(x)"]
        .iter()
        .map(|f| session.evaluate_fragment(f, EvalMode::Repl))
        .collect();
    assert!(results[1].captured_stdout.contains("42"));
    assert!(results[3].captured_stdout.contains("99"));
}
