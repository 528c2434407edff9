//! エラー出力の整形と入力補助

use mojoprobe_target::FailureKind;

/// 評価エラーの例外名
pub const EVAL_ERROR_NAME: &str = "MojoError";

/// 評価エンジンが失われた場合の例外名
pub const REPL_ERROR_NAME: &str = "REPLError";

/// 評価が時間内に終わらなかった場合の例外名
pub const TIMEOUT_ERROR_NAME: &str = "TimeoutError";

/// プロトコルエラーの例外名
pub const PROTOCOL_ERROR_NAME: &str = "ProtocolError";

/// 整形済みのエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl Diagnostic {
    /// 評価エラーのテキストから作る
    ///
    /// `evalue` は最初の空でない行から `[User] ` 接頭辞を除いたもの、
    /// `traceback` は `(null)` を含まない空でない行です。
    pub fn from_error_text(text: &str) -> Self {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();

        let evalue = lines
            .first()
            .map(|l| {
                let l = l.trim_start();
                l.strip_prefix("[User] ").unwrap_or(l).to_string()
            })
            .unwrap_or_else(|| "evaluation failed".to_string());

        let traceback = lines
            .iter()
            .filter(|l| !l.contains("(null)"))
            .map(|l| l.to_string())
            .collect();

        Self {
            ename: EVAL_ERROR_NAME.to_string(),
            evalue,
            traceback,
        }
    }

    /// 失敗の原因に応じて作る
    ///
    /// 断片自体のエラーは [`Diagnostic::from_error_text`] と同じです。
    pub fn from_failure(failure: FailureKind, text: &str) -> Self {
        match failure {
            FailureKind::Evaluation => Self::from_error_text(text),
            FailureKind::EngineLost => Self::engine(
                REPL_ERROR_NAME,
                "REPL process died",
                "The REPL process terminated unexpectedly",
                text,
            ),
            FailureKind::Timeout => Self::engine(
                TIMEOUT_ERROR_NAME,
                "Expression timed out",
                "Expression evaluation timed out",
                text,
            ),
        }
    }

    fn engine(ename: &str, evalue: &str, summary: &str, detail: &str) -> Self {
        let mut traceback = vec![summary.to_string()];
        let detail = detail.trim();
        if !detail.is_empty() {
            traceback.push(detail.to_string());
        }
        Self {
            ename: ename.to_string(),
            evalue: evalue.to_string(),
            traceback,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ename: PROTOCOL_ERROR_NAME.to_string(),
            traceback: vec![message.clone()],
            evalue: message,
        }
    }
}

/// 入力が1つの断片として完結しているか
///
/// 末尾が `:`（ブロックの開始）か `\`（行継続）なら続きがあるとみなします。
pub fn is_complete(code: &str) -> bool {
    let trimmed = code.trim_end();
    if trimmed.is_empty() {
        return true;
    }
    !(trimmed.ends_with(':') || trimmed.ends_with('\\'))
}

/// カーソル位置を含む識別子の範囲
///
/// カーソルも戻り値も文字単位（Unicode スカラー値の個数）のオフセットです。
pub fn identifier_span(code: &str, cursor: usize) -> (usize, usize) {
    let chars: Vec<char> = code.chars().collect();
    let cursor = cursor.min(chars.len());
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';

    let start = chars[..cursor]
        .iter()
        .rposition(|&c| !is_ident(c))
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = chars[cursor..]
        .iter()
        .position(|&c| !is_ident(c))
        .map(|i| cursor + i)
        .unwrap_or(chars.len());
    (start, end)
}

/// 文字単位の範囲を切り出す
pub fn char_slice(code: &str, start: usize, end: usize) -> String {
    code.chars().skip(start).take(end.saturating_sub(start)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_error_text() {
        let text = "[User] error: use of unknown declaration 'x'\n  x = 99\n  ^\n(null)\n";
        let d = Diagnostic::from_error_text(text);
        assert_eq!(d.ename, "MojoError");
        assert_eq!(d.evalue, "error: use of unknown declaration 'x'");
        assert_eq!(
            d.traceback,
            vec![
                "[User] error: use of unknown declaration 'x'".to_string(),
                "  x = 99".to_string(),
                "  ^".to_string(),
            ]
        );
    }

    #[test]
    fn test_from_empty_error_text() {
        let d = Diagnostic::from_error_text("");
        assert_eq!(d.evalue, "evaluation failed");
        assert!(d.traceback.is_empty());
    }

    #[test]
    fn test_is_complete() {
        assert!(is_complete("print(1)"));
        assert!(is_complete(""));
        assert!(!is_complete("fn f() -> Int:"));
        assert!(!is_complete("var x = 1 + \\"));
        assert!(is_complete("fn f() -> Int:\n    return 1\n"));
    }

    #[test]
    fn test_identifier_span() {
        assert_eq!(identifier_span("print(ab", 8), (6, 8));
        assert_eq!(identifier_span("foo.bar_baz", 6), (4, 11));
        assert_eq!(identifier_span("x = ", 4), (4, 4));
        assert_eq!(identifier_span("", 3), (0, 0));
    }

    #[test]
    fn test_identifier_span_counts_characters() {
        // "é" は2バイトだが1文字
        let code = "print(\"é\", pri";
        assert_eq!(code.chars().count(), 14);
        assert_eq!(identifier_span(code, 14), (11, 14));
        assert_eq!(char_slice(code, 11, 14), "pri");

        assert_eq!(identifier_span("naïve_x + 1", 3), (0, 7));
        assert_eq!(char_slice("naïve_x + 1", 0, 7), "naïve_x");
    }

    #[test]
    fn test_from_failure() {
        let d = Diagnostic::from_failure(FailureKind::EngineLost, "lldb connection closed");
        assert_eq!(d.ename, "REPLError");
        assert_eq!(d.evalue, "REPL process died");
        assert_eq!(
            d.traceback,
            vec![
                "The REPL process terminated unexpectedly".to_string(),
                "lldb connection closed".to_string(),
            ]
        );

        let d = Diagnostic::from_failure(FailureKind::Timeout, "");
        assert_eq!(d.ename, "TimeoutError");
        assert_eq!(d.evalue, "Expression timed out");
        assert_eq!(d.traceback, vec!["Expression evaluation timed out".to_string()]);

        let d = Diagnostic::from_failure(FailureKind::Evaluation, "error: bad");
        assert_eq!(d, Diagnostic::from_error_text("error: bad"));
    }
}
