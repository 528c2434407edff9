//! インプロセスの模擬バックエンド
//!
//! 実際のデバッガを使わずにセッションの手順を確認するためのホストです。
//! 推論対象プロセスの代わりに [`language`] の小さな言語を解釈し、
//! 評価経路（API・コマンド・REPL）ごとに束縛を永続化するかどうかを設定できます。
//! 各ライフサイクル操作の呼び出し回数は [`SimLedger`] に記録されます。

pub mod language;

use crate::backend::{
    Backend, Breakpoint, Channel, CommandReturn, ExpressionValue, FailureKind, Host, HostSettings,
    Language, Process, Target,
};
use crate::errors::{ERR_HOST_GONE, ERR_PROCESS_GONE};
use crate::expression::{internal, ExpressionOptions};
use crate::state::ProcessState;
use crate::Result;
use language::{execute, Scope};
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

/// 模擬ホストが認識する言語名
pub const SIM_LANGUAGE: &str = "mojo";

/// 評価経路ごとの永続化設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPersistence {
    /// 評価 API 直接呼び出し
    pub api: bool,
    /// コマンドインタプリタ経由
    pub command: bool,
    /// REPL 永続化フラグ付き
    pub repl: bool,
}

impl Default for SimPersistence {
    fn default() -> Self {
        Self {
            api: false,
            command: false,
            repl: true,
        }
    }
}

/// 模擬バックエンドの設定
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub fail_initialize: bool,
    pub fail_host_creation: bool,
    pub fail_target_creation: bool,
    pub plugin_loads: bool,
    /// 起動直後のプロセス状態
    pub launch_state: ProcessState,
    pub persistence: SimPersistence,
    /// 起動時に標準出力へ書かれるバナー
    pub banner_stdout: String,
    /// 起動時に標準エラーへ書かれるバナー
    pub banner_stderr: String,
    /// 1回の読み出しで返す最大バイト数
    pub max_read: usize,
    /// この断片を評価すると応答が返らなくなる（中断すると戻る）
    pub stall_on: Option<String>,
    /// この断片を評価すると推論対象プロセスがクラッシュする
    pub crash_on: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fail_initialize: false,
            fail_host_creation: false,
            fail_target_creation: false,
            plugin_loads: true,
            launch_state: ProcessState::Stopped,
            persistence: SimPersistence::default(),
            banner_stdout: "Welcome to the simulated REPL entry point\n".to_string(),
            banner_stderr: "sim: loading runtime\n".to_string(),
            max_read: 4096,
            stall_on: None,
            crash_on: None,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerCounts {
    initialize: Cell<usize>,
    create_host: Cell<usize>,
    destroy_host: Cell<usize>,
    terminate: Cell<usize>,
    destroy_process: Cell<usize>,
    evaluations: Cell<usize>,
    interrupts: Cell<usize>,
    commands: RefCell<Vec<String>>,
}

/// 模擬バックエンドの呼び出し記録
#[derive(Debug, Clone, Default)]
pub struct SimLedger {
    counts: Rc<LedgerCounts>,
}

fn bump(cell: &Cell<usize>) {
    cell.set(cell.get() + 1);
}

impl SimLedger {
    pub fn initialize_calls(&self) -> usize {
        self.counts.initialize.get()
    }

    pub fn create_host_calls(&self) -> usize {
        self.counts.create_host.get()
    }

    pub fn destroy_host_calls(&self) -> usize {
        self.counts.destroy_host.get()
    }

    pub fn terminate_calls(&self) -> usize {
        self.counts.terminate.get()
    }

    pub fn destroy_process_calls(&self) -> usize {
        self.counts.destroy_process.get()
    }

    /// 推論対象プロセスに届いた評価の回数
    pub fn evaluations(&self) -> usize {
        self.counts.evaluations.get()
    }

    pub fn interrupt_calls(&self) -> usize {
        self.counts.interrupts.get()
    }

    /// コマンドインタプリタに渡されたコマンド
    pub fn commands(&self) -> Vec<String> {
        self.counts.commands.borrow().clone()
    }
}

/// 模擬の推論対象プロセス
#[derive(Debug)]
struct Inferior {
    state: ProcessState,
    stdout: Vec<u8>,
    stdout_cursor: usize,
    stderr: Vec<u8>,
    stderr_cursor: usize,
    /// 永続化された束縛
    persistent: Scope,
}

impl Inferior {
    /// 断片を評価する
    ///
    /// 永続化しない場合は空のスコープで評価して捨てます。
    /// 巻き戻しが有効ならエラー時に束縛の変更を破棄しますが、出力は残ります。
    fn evaluate(&mut self, fragment: &str, persist: bool, unwind: bool) -> ExpressionValue {
        if !self.state.is_stopped() {
            return ExpressionValue::err(format!("error: process is not stopped (state: {})", self.state));
        }

        let result = if !persist {
            let mut scratch = Scope::default();
            execute(fragment, &mut scratch, &mut self.stdout)
        } else if unwind {
            let mut scratch = self.persistent.clone();
            let result = execute(fragment, &mut scratch, &mut self.stdout);
            if result.is_ok() {
                self.persistent = scratch;
            }
            result
        } else {
            execute(fragment, &mut self.persistent, &mut self.stdout)
        };

        match result {
            Ok(value) => ExpressionValue::ok(value.map(|v| v.to_string())),
            Err(e) => ExpressionValue::err(format!("error: {}", e)),
        }
    }
}

/// ホスト・ターゲット・プロセスが共有する状態
#[derive(Debug)]
struct World {
    config: SimConfig,
    ledger: SimLedger,
    destroyed: bool,
    plugin_loaded: bool,
    repl_language: Option<Language>,
    inferior: Option<Inferior>,
    /// 評価が終わらないまま応答を待っている
    stalled: bool,
}

type Shared = Rc<RefCell<World>>;

impl World {
    fn knows(&self, language: &Language) -> bool {
        self.plugin_loaded && language.name() == SIM_LANGUAGE
    }

    fn evaluate(&mut self, fragment: &str, language: Option<&Language>, persist: bool, unwind: bool) -> ExpressionValue {
        let language = match language.or(self.repl_language.as_ref()) {
            Some(lang) => lang.clone(),
            None => return ExpressionValue::err("error: no language specified for expression"),
        };
        if !self.knows(&language) {
            return ExpressionValue::err(format!(
                "error: no expression evaluator for language '{}'",
                language.name()
            ));
        }
        if self.stalled {
            return ExpressionValue::failed(FailureKind::Timeout, "simulated evaluation is still running");
        }
        let Some(inferior) = self.inferior.as_mut() else {
            return ExpressionValue::err("error: invalid process");
        };
        bump(&self.ledger.counts.evaluations);

        let fragment_is = |trigger: &Option<String>| trigger.as_deref() == Some(fragment.trim());
        if fragment_is(&self.config.stall_on) {
            self.stalled = true;
            return ExpressionValue::failed(FailureKind::Timeout, "simulated evaluation timed out");
        }
        if fragment_is(&self.config.crash_on) {
            inferior.state = ProcessState::Crashed;
            return ExpressionValue::failed(FailureKind::EngineLost, "simulated process crashed");
        }
        inferior.evaluate(fragment, persist, unwind)
    }
}

/// 模擬バックエンド
pub struct SimBackend {
    config: SimConfig,
    ledger: SimLedger,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            ledger: SimLedger::default(),
        }
    }

    /// 呼び出し記録を取得する（クローンは同じ記録を共有する）
    pub fn ledger(&self) -> SimLedger {
        self.ledger.clone()
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Backend for SimBackend {
    type Host = SimHost;

    const PROCESS_WIDE: bool = false;

    fn initialize(&mut self) -> Result<()> {
        bump(&self.ledger.counts.initialize);
        if self.config.fail_initialize {
            return Err(anyhow::anyhow!("simulated backend failed to initialize"));
        }
        Ok(())
    }

    fn create_host(&mut self) -> Result<SimHost> {
        bump(&self.ledger.counts.create_host);
        if self.config.fail_host_creation {
            return Err(anyhow::anyhow!("simulated host creation failure"));
        }
        let world = World {
            config: self.config.clone(),
            ledger: self.ledger.clone(),
            destroyed: false,
            plugin_loaded: false,
            repl_language: None,
            inferior: None,
            stalled: false,
        };
        Ok(SimHost {
            world: Rc::new(RefCell::new(world)),
            settings: None,
        })
    }

    fn destroy_host(&mut self, host: SimHost) {
        bump(&self.ledger.counts.destroy_host);
        host.world.borrow_mut().destroyed = true;
    }

    fn terminate(&mut self) {
        bump(&self.ledger.counts.terminate);
    }
}

/// 模擬ホスト
pub struct SimHost {
    world: Shared,
    settings: Option<HostSettings>,
}

impl SimHost {
    /// 最後に適用された設定
    pub fn settings(&self) -> Option<&HostSettings> {
        self.settings.as_ref()
    }
}

fn expression_command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^expression\s+(?:(?:-l|--language)\s+(\S+)\s+)?--\s?(.*)$").unwrap()
    })
}

impl Host for SimHost {
    type Target = SimTarget;

    fn configure(&mut self, settings: &HostSettings) -> Result<()> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn handle_command(&mut self, command: &str) -> CommandReturn {
        let mut world = self.world.borrow_mut();
        world.ledger.counts.commands.borrow_mut().push(command.to_string());
        if world.destroyed {
            return CommandReturn::failure(format!("error: {}", ERR_HOST_GONE));
        }

        if let Some(path) = command.strip_prefix("plugin load ") {
            if world.config.plugin_loads {
                world.plugin_loaded = true;
                return CommandReturn::success("");
            }
            return CommandReturn::failure(format!(
                "error: unable to load plugin '{}': no such file",
                path.trim()
            ));
        }

        if let Some(caps) = expression_command_re().captures(command) {
            let language = caps.get(1).map(|m| Language::Named(m.as_str().to_string()));
            let persist = world.config.persistence.command;
            // コマンド経由の評価はエラー時に巻き戻す
            let value = world.evaluate(&caps[2], language.as_ref(), persist, true);
            return match value.error {
                None => CommandReturn::success(value.summary.unwrap_or_default()),
                Some(e) => CommandReturn::failure(e),
            };
        }

        let name = command.split_whitespace().next().unwrap_or("");
        CommandReturn::failure(format!("error: '{}' is not a valid command.", name))
    }

    fn interrupt(&mut self) -> Result<()> {
        let mut world = self.world.borrow_mut();
        bump(&world.ledger.counts.interrupts);
        if world.destroyed {
            return Err(anyhow::anyhow!(ERR_HOST_GONE));
        }
        let alive = world.inferior.as_ref().is_some_and(|i| !i.state.is_terminal());
        if !alive {
            return Err(anyhow::anyhow!(ERR_PROCESS_GONE));
        }
        world.stalled = false;
        Ok(())
    }

    fn language_from_name(&self, name: &str) -> Language {
        if self.world.borrow().knows(&Language::Named(name.to_string())) {
            Language::Named(name.to_string())
        } else {
            Language::Unknown
        }
    }

    fn set_repl_language(&mut self, language: &Language) {
        self.world.borrow_mut().repl_language = Some(language.clone());
    }

    fn create_target(&mut self, image: &Path) -> Result<SimTarget> {
        let world = self.world.borrow();
        if world.destroyed {
            return Err(anyhow::anyhow!(ERR_HOST_GONE));
        }
        if world.config.fail_target_creation {
            return Err(anyhow::anyhow!("unable to open executable {:?}", image));
        }
        Ok(SimTarget {
            world: Rc::clone(&self.world),
            image: image.to_path_buf(),
            breakpoints: Vec::new(),
        })
    }
}

/// 模擬ターゲット
pub struct SimTarget {
    world: Shared,
    image: PathBuf,
    breakpoints: Vec<String>,
}

impl SimTarget {
    pub fn image(&self) -> &Path {
        &self.image
    }

    /// 設定されたブレークポイントのシンボル名
    pub fn breakpoints(&self) -> &[String] {
        &self.breakpoints
    }
}

impl Target for SimTarget {
    type Process = SimProcess;

    fn breakpoint_create_by_name(&mut self, symbol: &str) -> Result<Breakpoint> {
        self.breakpoints.push(symbol.to_string());
        Ok(Breakpoint {
            id: self.breakpoints.len() as u32,
            locations: 1,
        })
    }

    fn launch_simple(&mut self) -> Result<SimProcess> {
        let mut world = self.world.borrow_mut();
        if world.destroyed {
            return Err(anyhow::anyhow!(ERR_HOST_GONE));
        }
        let inferior = Inferior {
            state: world.config.launch_state,
            stdout: world.config.banner_stdout.clone().into_bytes(),
            stdout_cursor: 0,
            stderr: world.config.banner_stderr.clone().into_bytes(),
            stderr_cursor: 0,
            persistent: Scope::default(),
        };
        world.inferior = Some(inferior);
        Ok(SimProcess {
            world: Rc::clone(&self.world),
            destroyed: false,
        })
    }

    fn evaluate_expression(&mut self, fragment: &str, options: &ExpressionOptions) -> ExpressionValue {
        let mut world = self.world.borrow_mut();
        let persist = if internal::repl_persistence_enabled(options) {
            world.config.persistence.repl
        } else {
            world.config.persistence.api
        };
        world.evaluate(fragment, options.language(), persist, options.unwind_on_error())
    }
}

/// 模擬プロセス
pub struct SimProcess {
    world: Shared,
    destroyed: bool,
}

impl SimProcess {
    /// 推論対象プロセスの出力として書き込む（テスト用の入口）
    pub fn inject_output(&mut self, channel: Channel, text: &str) {
        if let Some(inferior) = self.world.borrow_mut().inferior.as_mut() {
            match channel {
                Channel::Stdout => inferior.stdout.extend_from_slice(text.as_bytes()),
                Channel::Stderr => inferior.stderr.extend_from_slice(text.as_bytes()),
            }
        }
    }
}

impl Process for SimProcess {
    fn state(&mut self) -> ProcessState {
        if self.destroyed {
            return ProcessState::Invalid;
        }
        self.world
            .borrow()
            .inferior
            .as_ref()
            .map(|i| i.state)
            .unwrap_or(ProcessState::Invalid)
    }

    fn read_output(&mut self, channel: Channel, buf: &mut [u8]) -> Result<usize> {
        if self.destroyed {
            return Err(anyhow::anyhow!(ERR_PROCESS_GONE));
        }
        let mut world = self.world.borrow_mut();
        let max_read = world.config.max_read.max(1);
        let Some(inferior) = world.inferior.as_mut() else {
            return Ok(0);
        };
        let (data, cursor) = match channel {
            Channel::Stdout => (&inferior.stdout, &mut inferior.stdout_cursor),
            Channel::Stderr => (&inferior.stderr, &mut inferior.stderr_cursor),
        };
        let available = &data[*cursor..];
        let n = available.len().min(buf.len()).min(max_read);
        buf[..n].copy_from_slice(&available[..n]);
        *cursor += n;
        Ok(n)
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let mut world = self.world.borrow_mut();
        bump(&world.ledger.counts.destroy_process);
        if let Some(inferior) = world.inferior.as_mut() {
            inferior.state = ProcessState::Exited(0);
        }
        Ok(())
    }
}
