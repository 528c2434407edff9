//! プローブの実行と報告
//!
//! 評価経路ごとに新しいセッションを立ち上げ（束縛が次の経路に漏れないように）、
//! 手順の各ステップを評価して結果を逐次書き出します。

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::evaluator::{EvalMode, EvaluationConfig, EvaluationResult};
use crate::probe::{Persistence, ProbeScript, StepReport};
use crate::session::Session;
use crate::sideload::AuxiliaryLibrary;
use crate::Result;
use mojoprobe_target::expression::internal;
use mojoprobe_target::{Backend, ExpressionOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 実行計画
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub modes: Vec<EvalMode>,
    pub scripts: Vec<ProbeScript>,
    /// 直接読み込む補助ライブラリ
    pub sideload: Option<PathBuf>,
}

impl Default for ProbePlan {
    fn default() -> Self {
        Self {
            modes: EvalMode::ALL.to_vec(),
            scripts: vec![ProbeScript::persistence()],
            sideload: None,
        }
    }
}

/// 評価経路1つ分の報告
#[derive(Debug, Clone)]
pub struct ModeReport {
    pub mode: EvalMode,
    pub plugin_loaded: bool,
    /// 手順名とステップごとの結果
    pub scripts: Vec<(String, Vec<StepReport>)>,
}

impl ModeReport {
    /// 手順ごとの永続化の観測結果
    pub fn persistence(&self) -> Vec<(String, Persistence)> {
        self.scripts
            .iter()
            .map(|(name, steps)| (name.clone(), Persistence::observe(steps)))
            .collect()
    }
}

/// 実行全体の報告
#[derive(Debug)]
pub struct RunReport {
    pub modes: Vec<ModeReport>,
    /// 補助ライブラリの読み込みに失敗した
    pub sideload_failed: bool,
}

impl RunReport {
    /// プロセスの終了コード
    pub fn exit_code(&self) -> i32 {
        if self.sideload_failed {
            1
        } else {
            0
        }
    }
}

pub struct Driver<W: Write> {
    out: W,
    sideloaded: Option<AuxiliaryLibrary>,
    sideload_failed: bool,
}

impl<W: Write> Driver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            sideloaded: None,
            sideload_failed: false,
        }
    }

    /// 計画を実行する
    ///
    /// `factory` は評価経路ごとに呼ばれ、新しいバックエンドを返します。
    /// 致命的なエラー（ホスト作成・ターゲット作成・停止状態に達しない）は後始末の後に返されます。
    pub fn run<B, F>(&mut self, plan: &ProbePlan, config: &SessionConfig, mut factory: F) -> Result<RunReport>
    where
        B: Backend,
        F: FnMut() -> B,
    {
        let mut modes = Vec::new();
        let outcome = plan
            .modes
            .iter()
            .try_for_each(|&mode| -> Result<()> {
                let report = self.run_mode(mode, plan, config, factory())?;
                modes.push(report);
                Ok(())
            });

        if let Some(mut library) = self.sideloaded.take() {
            if let Err(e) = library.release() {
                warn!("{}", e);
            }
        }
        outcome?;
        self.out.flush()?;

        Ok(RunReport {
            modes,
            sideload_failed: self.sideload_failed,
        })
    }

    fn run_mode<B: Backend>(
        &mut self,
        mode: EvalMode,
        plan: &ProbePlan,
        config: &SessionConfig,
        backend: B,
    ) -> Result<ModeReport> {
        writeln!(self.out, "=== {} ===", mode.title())?;

        let (mut session, bootstrap) = match Session::bootstrap(backend, config.clone()) {
            Ok(v) => v,
            Err(e) => {
                writeln!(self.out, "Fatal: {}", e)?;
                return Err(e);
            }
        };
        writeln!(
            self.out,
            "Plugin loaded: {}",
            if bootstrap.plugin_loaded { "yes" } else { "no" }
        )?;

        let launch = match session.launch() {
            Ok(report) => report,
            Err(e) => {
                if let Some(SessionError::NotStopped(state)) = e.downcast_ref::<SessionError>() {
                    writeln!(self.out, "Process state: {} ({})", state.code(), state)?;
                }
                writeln!(self.out, "Fatal: {}", e)?;
                session.teardown();
                return Err(e);
            }
        };
        writeln!(
            self.out,
            "Breakpoint {}: {} location(s)",
            launch.breakpoint.id, launch.breakpoint.locations
        )?;
        writeln!(self.out, "Process state: {} ({})", launch.state.code(), launch.state)?;

        if let Some(path) = &plan.sideload {
            self.sideload(path)?;
        }

        if mode == EvalMode::Repl {
            self.report_repl_flag(&session)?;
        }

        let mut scripts = Vec::new();
        for script in &plan.scripts {
            writeln!(self.out, "\n# script: {}", script.name)?;
            let mut steps = Vec::new();
            for (i, step) in script.steps.iter().enumerate() {
                writeln!(self.out, "\n--- Test {}: {} ---", i + 1, step.label)?;
                let result = session.evaluate_fragment(&step.fragment, mode);
                self.print_result(&result)?;
                let expectation_held = step.expectation.holds(&result);
                steps.push(StepReport {
                    step: step.clone(),
                    result,
                    expectation_held,
                });
            }
            let verdict = Persistence::observe(&steps);
            writeln!(self.out, "\nPersistence ({}, {}): {}", mode, script.name, verdict)?;
            info!("{} / {}: {}", mode, script.name, verdict);
            scripts.push((script.name.clone(), steps));
        }

        session.teardown();
        writeln!(self.out)?;

        Ok(ModeReport {
            mode,
            plugin_loaded: bootstrap.plugin_loaded,
            scripts,
        })
    }

    /// 補助ライブラリを読み込む（実行全体で1回だけ試みる）
    fn sideload(&mut self, path: &Path) -> Result<()> {
        if self.sideloaded.is_some() || self.sideload_failed {
            return Ok(());
        }
        writeln!(self.out, "\n--- Loading {} ---", path.display())?;
        match AuxiliaryLibrary::load(path) {
            Ok(library) => {
                writeln!(self.out, "sideload succeeded")?;
                self.sideloaded = Some(library);
            }
            Err(e) => {
                writeln!(self.out, "sideload failed: {}", e)?;
                warn!("{}", e);
                self.sideload_failed = true;
            }
        }
        Ok(())
    }

    fn report_repl_flag<B: Backend>(&mut self, session: &Session<B>) -> Result<()> {
        let before = internal::repl_persistence_enabled(&ExpressionOptions::new());
        let options = EvaluationConfig::probe(session.language().clone(), EvalMode::Repl).to_options();
        let after = internal::repl_persistence_enabled(&options);
        writeln!(self.out, "REPL enabled before: {}", before as u8)?;
        writeln!(self.out, "REPL enabled after: {}", after as u8)?;
        Ok(())
    }

    fn print_result(&mut self, result: &EvaluationResult) -> Result<()> {
        let msg = if result.succeeded {
            "(null)"
        } else {
            result.error_message.trim_end()
        };
        writeln!(
            self.out,
            "Error: {} msg: {} stdout: [{}] stderr: [{}]",
            if result.succeeded { "no" } else { "yes" },
            msg,
            result.captured_stdout,
            result.captured_stderr
        )?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
