//! lldb の端末出力の整形と解析

use crate::backend::Breakpoint;
use crate::state::ProcessState;
use regex::Regex;
use std::sync::OnceLock;

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]|\x1b\[\?[0-9;]*[A-Za-z]").unwrap())
}

/// REPL のプロンプト行（`1> `、継続行 `2. `）
fn repl_prompt_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+[>.]\s").unwrap())
}

/// 行頭の `error:`（`[User] ` 接頭辞付きを含む）
fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:\[User\]\s*)?error:").unwrap())
}

/// ANSI エスケープシーケンスを取り除く
pub fn strip_ansi(text: &str) -> String {
    ansi_re().replace_all(text, "").into_owned()
}

/// コマンドの応答から端末由来のノイズを取り除く
///
/// 復帰文字、送信した行のエコー、REPL のプロンプト行を削除します。
pub fn clean_reply(raw: &str, sent: &[&str]) -> String {
    let text = strip_ansi(raw).replace('\r', "");
    let mut echoes: Vec<&str> = sent.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();

    let mut kept = Vec::new();
    for line in text.split('\n') {
        let trimmed = line.trim();
        if let Some(pos) = echoes.iter().position(|e| *e == trimmed) {
            echoes.remove(pos);
            continue;
        }
        if repl_prompt_line_re().is_match(line) {
            let body = repl_prompt_line_re().replace(line, "");
            if body.trim().is_empty() || sent.iter().any(|s| s.trim() == body.trim()) {
                continue;
            }
        }
        kept.push(line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    while kept.first().is_some_and(|l| l.trim().is_empty()) {
        kept.remove(0);
    }
    kept.join("\n")
}

/// 応答を通常出力とエラー行に分ける
///
/// 行頭が `error:` の行が現れたら、それ以降はすべてエラーとして扱います。
/// 値の表示の途中に現れる `error:` はエラーとみなしません。
pub fn split_errors(text: &str) -> (String, Vec<String>) {
    let mut output = Vec::new();
    let mut errors = Vec::new();
    let mut in_error = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if error_re().is_match(line) {
            in_error = true;
        }
        if in_error {
            let s = line.trim();
            if s != "(null)" {
                errors.push(s.to_string());
            }
        } else {
            output.push(line);
        }
    }

    (output.join("\n"), errors)
}

/// `process status` などの出力からプロセス状態を読み取る
pub fn parse_process_state(text: &str) -> Option<ProcessState> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"Process \d+ (stopped|exited|running|launching|crashed|detached)(?: with status = (-?\d+))?")
            .unwrap()
    });

    // 最後に報告された状態を採用する
    let caps = re.captures_iter(text).last()?;
    let state = match &caps[1] {
        "stopped" => ProcessState::Stopped,
        "running" => ProcessState::Running,
        "launching" => ProcessState::Launching,
        "crashed" => ProcessState::Crashed,
        "detached" => ProcessState::Detached,
        "exited" => {
            let code = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            ProcessState::Exited(code)
        }
        _ => return None,
    };
    Some(state)
}

/// `breakpoint set` の出力を読み取る
pub fn parse_breakpoint(text: &str) -> Option<Breakpoint> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"Breakpoint (\d+): (?:(\d+) locations|(no locations)|where = )").unwrap()
    });

    let caps = re.captures(text)?;
    let id = caps[1].parse().ok()?;
    let locations = if let Some(n) = caps.get(2) {
        n.as_str().parse().ok()?
    } else if caps.get(3).is_some() {
        0
    } else {
        1
    };
    Some(Breakpoint { id, locations })
}

/// `expression` の結果行（`(Int) $0 = 42`）から値を取り出す
pub fn parse_expression_value(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\([^)]*\) \$R?\d+ = (.*)$").unwrap());

    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .or_else(|| {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;31merror:\x1b[0m bad"), "error: bad");
        assert_eq!(strip_ansi("\x1b[?2004hplain"), "plain");
    }

    #[test]
    fn test_clean_reply_removes_echo() {
        let raw = "expression -l mojo -- print(x)\r\n(Int) $0 = 42\r\n";
        assert_eq!(clean_reply(raw, &["expression -l mojo -- print(x)"]), "(Int) $0 = 42");
    }

    #[test]
    fn test_clean_reply_removes_repl_prompts() {
        let raw = "  1> var x = 42\n  2. \n(Int) x = 42\n";
        assert_eq!(clean_reply(raw, &["var x = 42", ""]), "(Int) x = 42");
    }

    #[test]
    fn test_split_errors() {
        let text = "some output\nerror: use of unknown declaration 'x'\n  print(x)\n        ^\n(null)";
        let (output, errors) = split_errors(text);
        assert_eq!(output, "some output");
        assert_eq!(
            errors,
            vec![
                "error: use of unknown declaration 'x'".to_string(),
                "print(x)".to_string(),
                "^".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_errors_user_prefix() {
        let (output, errors) = split_errors("[User] error: expected ':' in function definition");
        assert_eq!(output, "");
        assert_eq!(errors, vec!["[User] error: expected ':' in function definition".to_string()]);
    }

    #[test]
    fn test_split_errors_ignores_error_inside_value() {
        let text = "(String) $0 = \"parse error: bad token\"\n(String) msg = \"Error: none\"";
        let (output, errors) = split_errors(text);
        assert_eq!(output, text);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_split_errors_clean() {
        let (output, errors) = split_errors("(Int) $0 = 7\n");
        assert_eq!(output, "(Int) $0 = 7");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_parse_process_state() {
        let text = "Process 4242 launched: '/opt/modroot/lib/mojo-repl-entry-point' (x86_64)\n\
                    Process 4242 stopped\n* thread #1, stop reason = breakpoint 1.1";
        assert_eq!(parse_process_state(text), Some(ProcessState::Stopped));
        assert_eq!(
            parse_process_state("Process 7 exited with status = 3 (0x00000003)"),
            Some(ProcessState::Exited(3))
        );
        assert_eq!(parse_process_state("error: invalid process"), None);
    }

    #[test]
    fn test_parse_breakpoint() {
        assert_eq!(
            parse_breakpoint("Breakpoint 1: where = mojo-repl-entry-point`mojo_repl_main, address = 0x1000"),
            Some(Breakpoint { id: 1, locations: 1 })
        );
        assert_eq!(
            parse_breakpoint("Breakpoint 2: 3 locations."),
            Some(Breakpoint { id: 2, locations: 3 })
        );
        assert_eq!(
            parse_breakpoint("Breakpoint 3: no locations (pending)."),
            Some(Breakpoint { id: 3, locations: 0 })
        );
    }

    #[test]
    fn test_parse_expression_value() {
        assert_eq!(parse_expression_value("(Int) $0 = 42"), Some("42".to_string()));
        assert_eq!(parse_expression_value("  "), None);
    }
}
