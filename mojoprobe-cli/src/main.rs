//! mojoprobe CLI - コマンドラインインターフェース
//!
//! デバッガホスト上の永続的な評価セッションを調べるためのツール

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mojoprobe_core::diagnostics::{is_complete, Diagnostic};
use mojoprobe_core::status::run_status_check;
use mojoprobe_core::{
    Driver, EvalMode, ModularRoot, ProbePlan, ProbeScript, Server, Session, SessionConfig,
};
use mojoprobe_target::{Backend, FailureKind, LldbBackend, LldbConfig, SimBackend};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// mojoprobe - persistent evaluation probe for a debugger host
#[derive(Parser)]
#[command(name = "mojoprobe")]
#[command(version = "0.1.0")]
#[command(about = "Probe persistent expression evaluation through a debugger host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: ProbeCommand,
}

#[derive(Subcommand)]
enum ProbeCommand {
    /// Check that a debugger host can be created
    Status {
        /// Modular installation root (exported to the environment when given)
        root: Option<PathBuf>,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Run probe scripts under each evaluation mode
    Probe {
        /// Modular installation root
        root: Option<PathBuf>,

        /// Evaluation mode to probe
        #[arg(long, value_enum, default_value_t = ModeArg::All)]
        mode: ModeArg,

        /// Probe script to run (repeatable)
        #[arg(long = "script", default_values_t = vec!["persistence".to_string()])]
        scripts: Vec<String>,

        /// Load the auxiliary library into this process before probing
        #[arg(long)]
        sideload: bool,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Serve JSON-line requests on stdin/stdout
    Serve {
        /// Modular installation root
        root: Option<PathBuf>,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Interactive evaluation loop
    Repl {
        /// Modular installation root
        root: Option<PathBuf>,

        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args, Clone)]
struct BackendArgs {
    /// Debugger backend
    #[arg(long, value_enum, default_value_t = BackendKind::Lldb)]
    backend: BackendKind,

    /// Path to the lldb executable
    #[arg(long, value_name = "PATH")]
    lldb: Option<PathBuf>,

    /// Give up on an unresponsive debugger after this many seconds
    #[arg(long, value_name = "SECS")]
    response_timeout: Option<u64>,
}

impl BackendArgs {
    fn lldb_config(&self) -> LldbConfig {
        let mut config = LldbConfig::default();
        if let Some(path) = &self.lldb {
            config.executable = path.clone();
        }
        config.response_timeout = self.response_timeout.map(Duration::from_secs);
        config
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Lldb,
    Sim,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Api,
    Command,
    Repl,
    All,
}

impl ModeArg {
    fn modes(self) -> Vec<EvalMode> {
        match self {
            ModeArg::Api => vec![EvalMode::Api],
            ModeArg::Command => vec![EvalMode::Command],
            ModeArg::Repl => vec![EvalMode::Repl],
            ModeArg::All => EvalMode::ALL.to_vec(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(command: ProbeCommand) -> Result<i32> {
    match command {
        ProbeCommand::Status { root, backend } => {
            if let Some(root) = &root {
                ModularRoot::new(root).export_environment();
            }
            let mut out = io::stdout().lock();
            let mut err = io::stderr().lock();
            Ok(match backend.backend {
                BackendKind::Lldb => {
                    run_status_check(LldbBackend::new(backend.lldb_config()), &mut out, &mut err)
                }
                BackendKind::Sim => run_status_check(SimBackend::default(), &mut out, &mut err),
            })
        }
        ProbeCommand::Probe {
            root,
            mode,
            scripts,
            sideload,
            backend,
        } => {
            let Some(root) = prepare_root("probe", root) else {
                return Ok(1);
            };
            let plan = ProbePlan {
                modes: mode.modes(),
                scripts: scripts
                    .iter()
                    .map(|name| {
                        ProbeScript::by_name(name)
                            .ok_or_else(|| anyhow::anyhow!("Unknown probe script: {}", name))
                    })
                    .collect::<Result<_>>()?,
                sideload: sideload.then(|| root.auxiliary_library()),
            };
            let config = SessionConfig::for_root(root);
            match backend.backend {
                BackendKind::Lldb => {
                    let lldb = backend.lldb_config();
                    run_probe(&plan, &config, || LldbBackend::new(lldb.clone()))
                }
                BackendKind::Sim => run_probe(&plan, &config, SimBackend::default),
            }
        }
        ProbeCommand::Serve { root, backend } => {
            let Some(root) = prepare_root("serve", root) else {
                return Ok(1);
            };
            let config = SessionConfig::for_root(root);
            match backend.backend {
                BackendKind::Lldb => {
                    let lldb = backend.lldb_config();
                    serve(move || LldbBackend::new(lldb.clone()), config)
                }
                BackendKind::Sim => serve(SimBackend::default, config),
            }
        }
        ProbeCommand::Repl { root, backend } => {
            let Some(root) = prepare_root("repl", root) else {
                return Ok(1);
            };
            let config = SessionConfig::for_root(root);
            match backend.backend {
                BackendKind::Lldb => run_repl(LldbBackend::new(backend.lldb_config()), config),
                BackendKind::Sim => run_repl(SimBackend::default(), config),
            }
        }
    }
}

/// ルートを確認し、言語ランタイム用の環境変数を設定する
fn prepare_root(subcommand: &str, root: Option<PathBuf>) -> Option<ModularRoot> {
    match root {
        Some(root) => {
            let root = ModularRoot::new(root);
            root.export_environment();
            Some(root)
        }
        None => {
            eprintln!("Usage: mojoprobe {} <modular-root>", subcommand);
            None
        }
    }
}

fn run_probe<B, F>(plan: &ProbePlan, config: &SessionConfig, factory: F) -> Result<i32>
where
    B: Backend,
    F: FnMut() -> B,
{
    let mut driver = Driver::new(io::stdout().lock());
    let report = driver.run(plan, config, factory)?;
    Ok(report.exit_code())
}

fn serve<B, F>(factory: F, config: SessionConfig) -> Result<i32>
where
    B: Backend,
    F: FnMut() -> B + 'static,
{
    let mut server = Server::start(factory, config)?;
    server.serve(io::stdin().lock(), io::stdout().lock())?;
    Ok(0)
}

/// 対話的な評価ループを実行する
fn run_repl<B: Backend>(backend: B, config: SessionConfig) -> Result<i32> {
    let (mut session, bootstrap) = Session::bootstrap(backend, config)?;
    if !bootstrap.plugin_loaded {
        eprintln!("warning: plugin not loaded: {}", bootstrap.plugin_error.trim());
    }
    session.launch()?;

    println!("Type a fragment; an empty line submits a block. Ctrl-D to exit.");

    let mut rl = DefaultEditor::new()?;
    let history = home::home_dir().map(|dir| dir.join(".mojoprobe_history"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    let mut counter = 1;
    let mut buffer = String::new();
    // 直前の評価がタイムアウトしたか
    let mut timed_out = false;
    loop {
        let prompt = if buffer.is_empty() {
            format!("{}> ", counter)
        } else {
            ".. ".to_string()
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim().is_empty() {
                    continue;
                }
                if !line.trim().is_empty() {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(&line);
                    // ブロックの途中なら空行まで続ける
                    if buffer.contains('\n') || !is_complete(&buffer) {
                        continue;
                    }
                }

                let fragment = std::mem::take(&mut buffer);
                rl.add_history_entry(fragment.as_str())?;
                let result = session.evaluate_fragment(&fragment, EvalMode::Repl);
                timed_out = result.failure == FailureKind::Timeout;
                print!("{}", result.captured_stdout);
                io::stdout().flush()?;
                eprint!("{}", result.captured_stderr);
                if !result.succeeded {
                    let diagnostic = Diagnostic::from_failure(result.failure, &result.error_message);
                    if result.failure.is_engine_failure() {
                        eprintln!("{}: {}", diagnostic.ename, diagnostic.evalue);
                    }
                    for line in &diagnostic.traceback {
                        eprintln!("{}", line);
                    }
                } else if let Some(value) = &result.value {
                    println!("{}", value);
                }
                counter += 1;
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("CTRL-C");
                if std::mem::take(&mut timed_out) {
                    match session.interrupt() {
                        Ok(()) => println!("Interrupted the pending evaluation."),
                        Err(e) => eprintln!("Error: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    session.teardown();
    Ok(0)
}
