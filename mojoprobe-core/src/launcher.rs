//! 推論対象プロセスの起動

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::Result;
use mojoprobe_target::{drain, Breakpoint, Channel, Host, Process, ProcessState, Target};
use tracing::{debug, info, warn};

/// 起動の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub breakpoint: Breakpoint,
    pub state: ProcessState,
    /// 起動時に捨てた標準出力
    pub discarded_stdout: String,
    /// 起動時に捨てた標準エラー
    pub discarded_stderr: String,
}

/// ターゲットを作成し、エントリシンボルで停止するまで起動する
///
/// 引数・環境変数・標準入力は上書きしないので、推論対象プロセスはこのプロセスの環境を継承します。
/// 停止状態に達しなかった場合はプロセスを破棄してから致命的エラーを返します。
/// 起動時のバナーは最初の評価の出力と混ざらないように両チャネルとも読み捨てます。
pub fn launch<H: Host>(
    host: &mut H,
    config: &SessionConfig,
) -> Result<(H::Target, <H::Target as Target>::Process, LaunchReport)> {
    let mut target = host
        .create_target(&config.entry_point)
        .map_err(|e| SessionError::TargetCreation {
            path: config.entry_point.clone(),
            reason: e.to_string(),
        })?;
    info!("target created: {:?}", config.entry_point);

    let breakpoint = target.breakpoint_create_by_name(&config.entry_symbol)?;
    if breakpoint.locations == 0 {
        warn!("breakpoint {} on {} is pending", breakpoint.id, config.entry_symbol);
    }

    let mut process = target.launch_simple()?;
    let state = process.state();
    if !state.is_stopped() {
        if let Err(e) = process.destroy() {
            warn!("failed to destroy process: {}", e);
        }
        return Err(SessionError::NotStopped(state).into());
    }

    let discarded_stdout = drain(&mut process, Channel::Stdout);
    let discarded_stderr = drain(&mut process, Channel::Stderr);
    debug!("discarded startup output: {:?} / {:?}", discarded_stdout, discarded_stderr);

    let report = LaunchReport {
        breakpoint,
        state,
        discarded_stdout,
        discarded_stderr,
    };
    Ok((target, process, report))
}
