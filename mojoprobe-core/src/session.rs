//! 評価セッション
//!
//! ホスト・ターゲット・プロセスの所有者です。作成は `Host` → `Target` → `Process` の順、
//! 破棄はその逆順で、どの経路で終了しても後始末はちょうど1回だけ行われます。

use crate::bootstrap::{self, BootstrapReport};
use crate::config::SessionConfig;
use crate::errors::{SessionError, ERR_NOT_LAUNCHED, ERR_TORN_DOWN};
use crate::evaluator::{self, EvalMode, EvaluationRequest, EvaluationResult};
use crate::launcher::{self, LaunchReport};
use crate::Result;
use mojoprobe_target::{
    Backend, FailureKind, Host, Language, LifecycleGuard, Process, ProcessOf, ProcessState, TargetOf,
};
use tracing::{debug, warn};

pub struct Session<B: Backend> {
    config: SessionConfig,
    guard: LifecycleGuard<B>,
    host: Option<B::Host>,
    language: Language,
    plugin_loaded: bool,
    target: Option<TargetOf<B>>,
    process: Option<ProcessOf<B>>,
    torn_down: bool,
}

impl<B: Backend> Session<B> {
    /// バックエンドを初期化し、ホストを立ち上げる
    ///
    /// ホストの作成に失敗した場合はバックエンドを終了してから
    /// [`SessionError::HostCreation`] を返します。
    pub fn bootstrap(backend: B, config: SessionConfig) -> Result<(Self, BootstrapReport)> {
        let mut guard = LifecycleGuard::acquire(backend)?;

        let mut host = match guard.backend_mut().create_host() {
            Ok(host) => host,
            Err(e) => {
                guard.release();
                return Err(SessionError::HostCreation(e.to_string()).into());
            }
        };

        let report = bootstrap::install(&mut host, &config);
        let session = Self {
            config,
            guard,
            host: Some(host),
            language: report.language.clone(),
            plugin_loaded: report.plugin_loaded,
            target: None,
            process: None,
            torn_down: false,
        };
        Ok((session, report))
    }

    /// 推論対象プロセスを起動する
    ///
    /// 失敗した場合はそのままエラーを返します。後始末は `teardown` かドロップで行われます。
    pub fn launch(&mut self) -> Result<LaunchReport> {
        if self.torn_down {
            return Err(anyhow::anyhow!(ERR_TORN_DOWN));
        }
        let host = self
            .host
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!(ERR_TORN_DOWN))?;
        let (target, process, report) = launcher::launch(host, &self.config)?;
        self.target = Some(target);
        self.process = Some(process);
        Ok(report)
    }

    /// 評価要求を処理する
    pub fn evaluate(&mut self, request: &EvaluationRequest) -> EvaluationResult {
        if self.torn_down {
            return EvaluationResult::failed(FailureKind::EngineLost, ERR_TORN_DOWN);
        }
        match (self.host.as_mut(), self.target.as_mut(), self.process.as_mut()) {
            (Some(host), Some(target), Some(process)) => {
                evaluator::evaluate(host, target, process, request)
            }
            _ => EvaluationResult::failure(ERR_NOT_LAUNCHED),
        }
    }

    /// 断片をセッションの言語で評価する
    pub fn evaluate_fragment(&mut self, fragment: &str, mode: EvalMode) -> EvaluationResult {
        let request = EvaluationRequest::new(fragment, mode, self.language.clone());
        self.evaluate(&request)
    }

    /// 実行中の評価を中断する
    pub fn interrupt(&mut self) -> Result<()> {
        if self.torn_down {
            return Err(anyhow::anyhow!(ERR_TORN_DOWN));
        }
        let host = self
            .host
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!(ERR_TORN_DOWN))?;
        host.interrupt()?;
        debug!("evaluation interrupted");
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn plugin_loaded(&self) -> bool {
        self.plugin_loaded
    }

    /// 推論対象プロセスの状態（未起動なら None）
    pub fn process_state(&mut self) -> Option<ProcessState> {
        self.process.as_mut().map(|p| p.state())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// プロセス・ホストを破棄し、バックエンドを終了する
    ///
    /// 2回目以降の呼び出しは何もしません。
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.destroy() {
                warn!("failed to destroy process: {}", e);
            }
        }
        self.target = None;
        if let Some(host) = self.host.take() {
            self.guard.backend_mut().destroy_host(host);
        }
        self.guard.release();
        debug!("session torn down");
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
