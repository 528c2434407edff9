//! lldb のコマンドインタプリタとの対話

use super::pty::{PtyChild, PtyError};
use super::transcript::{clean_reply, split_errors};
use super::LldbConfig;
use crate::backend::{CommandReturn, Language};
use crate::Result;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// コマンドモードのプロンプト
pub const COMMAND_PROMPT: &str = "(mojoprobe) ";

/// プロンプト検出後に出力が止まったとみなすまでの時間
const SETTLE: Duration = Duration::from_millis(50);

/// REPL のプロンプトは評価結果の直後に出るので長めに待つ
const REPL_SETTLE: Duration = Duration::from_millis(300);

/// SIGINT の後に出力が落ち着くまでの時間
const INTERRUPT_SETTLE: Duration = Duration::from_millis(100);

/// 複数行の式入力の案内文
const MULTILINE_BANNER: &str = "Enter expressions, then terminate with an empty line to evaluate:";

/// lldb 起動時に適用する設定
const STARTUP_SETTINGS: &[&str] = &[
    "settings set prompt \"(mojoprobe) \"",
    "settings set use-color false",
    "settings set show-statusline false",
    "settings set show-progress false",
    "settings set show-autosuggestion false",
    "settings set auto-indent false",
    "settings set auto-confirm true",
];

/// インタプリタの入力モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    /// lldb のコマンドプロンプト
    Command,
    /// 言語 REPL（コマンドには `:` を付ける）
    Repl,
}

/// 応答の追従状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// 直前の応答をプロンプトまで読み終えている
    Ready,
    /// 応答を待ちきれずに打ち切った（遅れて届く応答が残っている）
    Behind,
    /// lldb が終了したか、追いつけなかった
    Lost,
}

/// lldb プロセスとの接続
///
/// 応答待ちがタイムアウトすると、次の送信の前に遅れて届く応答をプロンプトまで読み捨てます。
/// それも時間内に終わらなければ接続は失われたものとし、以降の操作は
/// [`PtyError::Closed`] で失敗します。
pub struct LldbConnection {
    pty: PtyChild,
    mode: InputMode,
    link: Link,
    deadline: Option<Duration>,
    command_prompt: Regex,
    repl_prompt: Regex,
}

impl LldbConnection {
    /// lldb を起動して最初のプロンプトまで待つ
    pub fn open(config: &LldbConfig) -> Result<Self> {
        let mut args = vec!["--no-lldbinit".to_string(), "--no-use-colors".to_string()];
        for setting in STARTUP_SETTINGS
            .iter()
            .map(|s| s.to_string())
            .chain(config.startup_commands.iter().cloned())
        {
            args.push("-O".to_string());
            args.push(setting);
        }

        let pty = PtyChild::spawn(&config.executable, &args)?;
        let mut conn = Self {
            pty,
            mode: InputMode::Command,
            link: Link::Ready,
            deadline: config.response_timeout,
            command_prompt: Regex::new(r"\(mojoprobe\) \s*$")?,
            repl_prompt: Regex::new(r"(?:^|\n)\s*\d+> \s*$")?,
        };

        let banner = conn.await_prompt(InputMode::Command)?;
        debug!("lldb ready (pid {}): {:?}", conn.pty.pid(), banner.trim());
        Ok(conn)
    }

    /// 接続が使える状態か
    pub fn is_open(&self) -> bool {
        self.link != Link::Lost
    }

    /// 指定したモードのプロンプトまで読む
    ///
    /// タイムアウトなら `Behind`、それ以外の失敗なら `Lost` に移ります。
    fn await_prompt(&mut self, mode: InputMode) -> std::result::Result<String, PtyError> {
        let (prompt, settle) = match mode {
            InputMode::Command => (&self.command_prompt, SETTLE),
            InputMode::Repl => (&self.repl_prompt, REPL_SETTLE),
        };
        let result = self.pty.read_until_prompt(prompt, settle, self.deadline);
        match &result {
            Ok(_) => {}
            Err(PtyError::Timeout(_)) => self.link = Link::Behind,
            Err(_) => self.link = Link::Lost,
        }
        result
    }

    /// 送信の前に、前の応答の残りと迷い込んだ出力を読み捨てる
    fn catch_up(&mut self) -> std::result::Result<(), PtyError> {
        match self.link {
            Link::Lost => Err(PtyError::Closed),
            Link::Ready => match self.pty.discard_available() {
                Ok(_) => Ok(()),
                Err(e) => {
                    self.link = Link::Lost;
                    Err(e)
                }
            },
            Link::Behind => match self.await_prompt(self.mode) {
                Ok(late) => {
                    debug!("discarded late reply: {:?}", late.trim());
                    self.link = Link::Ready;
                    Ok(())
                }
                Err(e) => {
                    warn!("lldb did not catch up ({}); closing connection", e);
                    self.link = Link::Lost;
                    Err(PtyError::Closed)
                }
            },
        }
    }

    /// 行を送る（書き込みに失敗したら接続を失ったものとする）
    fn send_lines(&mut self, lines: &[&str]) -> std::result::Result<(), PtyError> {
        for line in lines {
            if let Err(e) = self.pty.send_line(line) {
                debug!("write to lldb failed: {}", e);
                self.link = Link::Lost;
                return Err(PtyError::Closed);
            }
        }
        Ok(())
    }

    /// 行を送り、現在のモードのプロンプトまで読んで整形済みの応答を返す
    fn exchange(&mut self, lines: &[&str]) -> Result<String> {
        self.catch_up()?;
        self.send_lines(lines)?;
        let raw = self.await_prompt(self.mode)?;

        let cleaned = clean_reply(&raw, lines);
        let cleaned: Vec<&str> = cleaned
            .lines()
            .filter(|l| l.trim() != MULTILINE_BANNER)
            .collect();
        Ok(cleaned.join("\n"))
    }

    /// コマンドを実行する
    ///
    /// 改行を含む `expression ... -- <本体>` は、ヘッダ行・本体の各行・空行に分けて
    /// 複数行入力として送ります。
    pub fn run(&mut self, command: &str) -> Result<CommandReturn> {
        let prefix = match self.mode {
            InputMode::Command => "",
            InputMode::Repl => ":",
        };

        let reply = match split_multiline(command) {
            Some((header, body)) => {
                let header = format!("{}{}", prefix, header);
                let mut lines = vec![header.as_str()];
                lines.extend(body.lines());
                lines.push("");
                self.exchange(&lines)?
            }
            None => {
                let line = format!("{}{}", prefix, command);
                self.exchange(&[line.as_str()])?
            }
        };

        Ok(to_command_return(&reply))
    }

    /// 言語 REPL に入る（既に REPL 中なら何もしない）
    pub fn enter_repl(&mut self, language: Option<&Language>) -> Result<()> {
        if self.mode == InputMode::Repl {
            return Ok(());
        }

        let command = match language {
            Some(lang) => format!("expression --repl -l {} --", lang.name()),
            None => "expression --repl --".to_string(),
        };
        self.catch_up()?;
        self.send_lines(&[command.as_str()])?;
        let banner = match self.await_prompt(InputMode::Repl) {
            Ok(banner) => banner,
            Err(e) => {
                // REPL に入ったかどうか分からないので追いつけない
                self.link = Link::Lost;
                return Err(e.into());
            }
        };
        debug!("entered REPL: {:?}", banner.trim());
        self.mode = InputMode::Repl;
        Ok(())
    }

    /// REPL に断片を送る（空行で入力を締めくくる）
    pub fn repl_submit(&mut self, fragment: &str) -> Result<CommandReturn> {
        let mut lines: Vec<&str> = fragment.lines().collect();
        lines.push("");
        let reply = self.exchange(&lines)?;
        Ok(to_command_return(&reply))
    }

    /// 実行中の評価を中断する
    ///
    /// lldb に SIGINT を送り、打ち切った応答が残っていればプロンプトまで読み捨てます。
    pub fn interrupt(&mut self) -> Result<()> {
        if self.link == Link::Lost {
            return Err(PtyError::Closed.into());
        }
        if let Err(e) = self.pty.interrupt() {
            self.link = Link::Lost;
            return Err(e.into());
        }
        if self.link == Link::Ready {
            std::thread::sleep(INTERRUPT_SETTLE);
        }
        self.catch_up()?;
        Ok(())
    }

    /// lldb を終了させる
    pub fn quit(&mut self) {
        let command = match self.mode {
            InputMode::Command => "quit",
            InputMode::Repl => ":quit",
        };
        if let Err(e) = self.pty.send_line(command) {
            warn!("failed to send quit to lldb: {}", e);
        }
        self.pty.shutdown(Duration::from_secs(5));
    }
}

/// 応答テキストをコマンド結果に変換する
fn to_command_return(reply: &str) -> CommandReturn {
    let (output, errors) = split_errors(reply);
    if errors.is_empty() {
        CommandReturn::success(output)
    } else {
        CommandReturn {
            succeeded: false,
            output,
            error: errors.join("\n"),
        }
    }
}

/// 複数行の `expression` コマンドをヘッダと本体に分ける
fn split_multiline(command: &str) -> Option<(&str, &str)> {
    if !command.contains('\n') {
        return None;
    }
    let pos = command.find(" -- ")?;
    let header = &command[..pos + 3];
    if !header.trim_start().starts_with("expression") || header.contains('\n') {
        return None;
    }
    Some((header, &command[pos + 4..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ERR_CONNECTION_CLOSED;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// 引数を無視し、受け取った行に `<行>-REPLY` と答える lldb の代役
    ///
    /// `late` には 1.5 秒遅れて答え、`hang` には答えない。
    const STAND_IN: &str = r#"#!/bin/bash
printf '(mojoprobe) '
while IFS= read -r line; do
  case "$line" in
    late) sleep 1.5; printf 'late-REPLY\n(mojoprobe) ' ;;
    hang) sleep 5 ;;
    *) printf '%s-REPLY\n(mojoprobe) ' "$line" ;;
  esac
done
"#;

    fn stand_in(dir: &Path) -> PathBuf {
        let path = dir.join("lldb");
        std::fs::write(&path, STAND_IN).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn open_with_timeout(dir: &Path) -> LldbConnection {
        LldbConnection::open(&LldbConfig {
            executable: stand_in(dir),
            response_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_split_multiline() {
        let cmd = "expression -l mojo -- fn add(a: Int, b: Int) -> Int:\n    return a + b";
        assert_eq!(
            split_multiline(cmd),
            Some(("expression -l mojo --", "fn add(a: Int, b: Int) -> Int:\n    return a + b"))
        );
        assert_eq!(split_multiline("expression -l mojo -- print(1)"), None);
        assert_eq!(split_multiline("plugin load a\nb"), None);
    }

    #[test]
    fn test_to_command_return() {
        let ok = to_command_return("(Int) $0 = 7");
        assert!(ok.succeeded);
        assert_eq!(ok.output, "(Int) $0 = 7");

        let failed = to_command_return("error: use of unknown declaration 'x'");
        assert!(!failed.succeeded);
        assert_eq!(failed.error, "error: use of unknown declaration 'x'");
    }

    #[test]
    fn test_late_reply_is_discarded_before_next_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_with_timeout(dir.path());
        assert_eq!(conn.run("fast").unwrap().output, "fast-REPLY");

        let err = conn.run("late").unwrap_err();
        assert!(matches!(err.downcast_ref::<PtyError>(), Some(PtyError::Timeout(_))));
        assert!(conn.is_open());

        assert_eq!(conn.run("fast").unwrap().output, "fast-REPLY");
        assert_eq!(conn.run("next").unwrap().output, "next-REPLY");
    }

    #[test]
    fn test_unresponsive_lldb_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_with_timeout(dir.path());

        let err = conn.run("hang").unwrap_err();
        assert!(matches!(err.downcast_ref::<PtyError>(), Some(PtyError::Timeout(_))));

        let err = conn.run("fast").unwrap_err();
        assert_eq!(err.to_string(), ERR_CONNECTION_CLOSED);
        assert!(!conn.is_open());

        let err = conn.run("fast").unwrap_err();
        assert!(matches!(err.downcast_ref::<PtyError>(), Some(PtyError::Closed)));
        assert!(conn.interrupt().is_err());
    }
}
