//! lldb バックエンドのホスト・ターゲット・プロセス

use super::connection::LldbConnection;
use super::pty::PtyError;
use super::transcript::{parse_breakpoint, parse_expression_value, parse_process_state};
use crate::backend::{
    Breakpoint, Channel, CommandReturn, ExpressionValue, FailureKind, Host, HostSettings, Language,
    Process, ScriptLanguage, Target,
};
use crate::errors::ERR_PROCESS_GONE;
use crate::expression::{internal, ExpressionOptions};
use crate::image::ImageInfo;
use crate::state::ProcessState;
use crate::Result;
use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

/// 起動後に状態を問い合わせる間隔
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Shared = Rc<RefCell<LldbConnection>>;

/// lldb ホスト
pub struct LldbHost {
    conn: Shared,
    repl_language: Option<Language>,
}

impl LldbHost {
    pub(super) fn new(conn: Shared) -> Self {
        Self {
            conn,
            repl_language: None,
        }
    }

    pub(super) fn connection(&self) -> &Shared {
        &self.conn
    }

    fn run(&self, command: &str) -> CommandReturn {
        match self.conn.borrow_mut().run(command) {
            Ok(ret) => ret,
            Err(e) => CommandReturn::failure(format!("error: {}", e)),
        }
    }
}

impl Host for LldbHost {
    type Target = LldbTarget;

    fn configure(&mut self, settings: &HostSettings) -> Result<()> {
        // コマンドインタプリタ経由の操作はすべて応答を待つ
        if settings.async_mode {
            return Err(anyhow::anyhow!(
                "asynchronous event delivery is not supported by the lldb command-line backend"
            ));
        }

        let lang = match settings.script_language {
            ScriptLanguage::None => "none",
            ScriptLanguage::Default => "default",
        };
        let ret = self.run(&format!("settings set script-lang {}", lang));
        if !ret.succeeded {
            warn!("failed to set script language: {}", ret.error);
        }
        Ok(())
    }

    fn handle_command(&mut self, command: &str) -> CommandReturn {
        self.run(command)
    }

    fn interrupt(&mut self) -> Result<()> {
        self.conn.borrow_mut().interrupt()
    }

    fn language_from_name(&self, name: &str) -> Language {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-');
        if valid {
            Language::Named(name.to_ascii_lowercase())
        } else {
            Language::Unknown
        }
    }

    fn set_repl_language(&mut self, language: &Language) {
        let ret = self.run(&format!("settings set repl-lang {}", language.name()));
        if !ret.succeeded {
            warn!("failed to set REPL language: {}", ret.error);
        }
        self.repl_language = Some(language.clone());
    }

    fn create_target(&mut self, image: &Path) -> Result<LldbTarget> {
        let info = ImageInfo::load(image)?;
        debug!(
            "image {:?}: {:?} {:?}, {} symbols",
            info.path,
            info.format,
            info.architecture,
            info.symbol_count()
        );

        let ret = self.run(&format!("target create \"{}\"", image.display()));
        if !ret.succeeded {
            return Err(anyhow::anyhow!("{}", ret.error));
        }

        Ok(LldbTarget {
            conn: Rc::clone(&self.conn),
            image: info,
            repl_language: self.repl_language.clone(),
        })
    }
}

/// lldb ターゲット
pub struct LldbTarget {
    conn: Shared,
    image: ImageInfo,
    repl_language: Option<Language>,
}

impl LldbTarget {
    pub fn image(&self) -> &ImageInfo {
        &self.image
    }

    fn run(&self, command: &str) -> Result<CommandReturn> {
        self.conn.borrow_mut().run(command)
    }

    fn query_state(&self) -> ProcessState {
        query_state(&self.conn)
    }
}

impl Target for LldbTarget {
    type Process = LldbProcess;

    fn breakpoint_create_by_name(&mut self, symbol: &str) -> Result<Breakpoint> {
        if !self.image.defines(symbol) {
            debug!("{} is not in the image symbol table; it may resolve from a shared library", symbol);
        }

        let ret = self.run(&format!("breakpoint set --name {}", symbol))?;
        if !ret.succeeded {
            return Err(anyhow::anyhow!("{}", ret.error));
        }
        parse_breakpoint(&ret.output)
            .ok_or_else(|| anyhow::anyhow!("Unexpected breakpoint reply: {}", ret.output))
    }

    fn launch_simple(&mut self) -> Result<LldbProcess> {
        let capture_dir = tempfile::Builder::new().prefix("mojoprobe-").tempdir()?;
        let stdout_path = capture_dir.path().join("stdout");
        let stderr_path = capture_dir.path().join("stderr");
        File::create(&stdout_path)?;
        File::create(&stderr_path)?;

        let ret = self.run(&format!(
            "process launch -o \"{}\" -e \"{}\"",
            stdout_path.display(),
            stderr_path.display()
        ))?;
        if !ret.succeeded {
            return Err(anyhow::anyhow!("{}", ret.error));
        }

        // 同期モード: 停止するか終了するまで待つ
        let deadline = Instant::now() + Duration::from_secs(300);
        let mut state = parse_process_state(&ret.output).unwrap_or(ProcessState::Launching);
        while !state.is_stopped() && !state.is_terminal() {
            if Instant::now() > deadline {
                break;
            }
            std::thread::sleep(LAUNCH_POLL_INTERVAL);
            state = self.query_state();
        }
        debug!("process launched, state: {}", state);

        Ok(LldbProcess {
            conn: Rc::clone(&self.conn),
            stdout: File::open(&stdout_path)?,
            stderr: File::open(&stderr_path)?,
            capture_dir,
            destroyed: false,
        })
    }

    fn evaluate_expression(&mut self, fragment: &str, options: &ExpressionOptions) -> ExpressionValue {
        let language = options.language().or(self.repl_language.as_ref()).cloned();

        let ret = if internal::repl_persistence_enabled(options) {
            // REPL の入力ハンドラ経由の評価だけが永続化フラグを立てる
            let mut conn = self.conn.borrow_mut();
            let submitted = match conn.enter_repl(language.as_ref()) {
                Ok(()) => conn.repl_submit(fragment),
                Err(e) => Err(e),
            };
            submitted
        } else {
            let command = expression_command(fragment, language.as_ref(), options);
            self.run(&command)
        };

        match ret {
            Ok(ret) if ret.succeeded => ExpressionValue::ok(parse_expression_value(&ret.output)),
            Ok(ret) => ExpressionValue::err(ret.error),
            Err(e) => {
                warn!("evaluation did not complete: {}", e);
                ExpressionValue::failed(connection_failure(&e), e.to_string())
            }
        }
    }
}

/// 接続の失敗を評価失敗の原因に対応づける
fn connection_failure(error: &anyhow::Error) -> FailureKind {
    match error.downcast_ref::<PtyError>() {
        Some(PtyError::Timeout(_)) => FailureKind::Timeout,
        _ => FailureKind::EngineLost,
    }
}

/// API 経由の評価に相当する `expression` コマンドを組み立てる
fn expression_command(fragment: &str, language: Option<&Language>, options: &ExpressionOptions) -> String {
    let mut command = String::from("expression");
    if let Some(lang) = language {
        command.push_str(&format!(" --language {}", lang.name()));
    }
    command.push_str(&format!(" --unwind-on-error {}", options.unwind_on_error()));
    let micros = options.timeout().map(|t| t.as_micros()).unwrap_or(0);
    command.push_str(&format!(" --timeout {}", micros));
    command.push_str(" -- ");
    command.push_str(fragment);
    command
}

fn query_state(conn: &Shared) -> ProcessState {
    match conn.borrow_mut().run("process status") {
        Ok(ret) => parse_process_state(&ret.output)
            .or_else(|| parse_process_state(&ret.error))
            .unwrap_or(ProcessState::Invalid),
        Err(e) => {
            warn!("failed to query process state: {}", e);
            ProcessState::Invalid
        }
    }
}

/// lldb 上で起動したプロセス
pub struct LldbProcess {
    conn: Shared,
    stdout: File,
    stderr: File,
    capture_dir: TempDir,
    destroyed: bool,
}

impl LldbProcess {
    /// 出力の振り向け先ディレクトリ
    pub fn capture_dir(&self) -> PathBuf {
        self.capture_dir.path().to_path_buf()
    }
}

impl Process for LldbProcess {
    fn state(&mut self) -> ProcessState {
        if self.destroyed {
            return ProcessState::Invalid;
        }
        query_state(&self.conn)
    }

    fn read_output(&mut self, channel: Channel, buf: &mut [u8]) -> Result<usize> {
        if self.destroyed {
            return Err(anyhow::anyhow!(ERR_PROCESS_GONE));
        }
        // 通常ファイルなので末尾に達すると 0 を返し、書き込みを待たない
        let n = match channel {
            Channel::Stdout => self.stdout.read(buf)?,
            Channel::Stderr => self.stderr.read(buf)?,
        };
        Ok(n)
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let ret = self.conn.borrow_mut().run("process kill")?;
        if !ret.succeeded {
            return Err(anyhow::anyhow!("{}", ret.error));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure() {
        let timeout = anyhow::Error::from(PtyError::Timeout(Duration::from_secs(1)));
        assert_eq!(connection_failure(&timeout), FailureKind::Timeout);
        let closed = anyhow::Error::from(PtyError::Closed);
        assert_eq!(connection_failure(&closed), FailureKind::EngineLost);
        let io = anyhow::anyhow!("Broken pipe");
        assert_eq!(connection_failure(&io), FailureKind::EngineLost);
    }

    #[test]
    fn test_expression_command() {
        let mut options = ExpressionOptions::new();
        options.set_unwind_on_error(false);
        let lang = Language::Named("mojo".to_string());
        assert_eq!(
            expression_command("var x = 42", Some(&lang), &options),
            "expression --language mojo --unwind-on-error false --timeout 0 -- var x = 42"
        );

        options.set_timeout(Some(Duration::from_millis(250)));
        assert_eq!(
            expression_command("print(x)", None, &options),
            "expression --unwind-on-error false --timeout 250000 -- print(x)"
        );
    }
}
