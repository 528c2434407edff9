//! プローブ手順
//!
//! 手順はデータとして表現し、ドライバが評価経路ごとに実行します。

use crate::evaluator::EvaluationResult;
use std::fmt;

/// 手順の結果に対する期待
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// 結果を問わない
    Any,
    Succeeds,
    Fails,
    /// 標準出力に、前後の空白を除くとこの文字列に一致する行がある（永続化の観測点）
    StdoutLine(String),
}

impl Expectation {
    pub fn holds(&self, result: &EvaluationResult) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::Succeeds => result.succeeded,
            Expectation::Fails => !result.succeeded && !result.error_message.is_empty(),
            Expectation::StdoutLine(text) => {
                result.succeeded
                    && result
                        .captured_stdout
                        .lines()
                        .any(|line| line.trim() == text.trim())
            }
        }
    }
}

/// 手順の1ステップ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeStep {
    pub label: String,
    pub fragment: String,
    pub expectation: Expectation,
}

impl ProbeStep {
    pub fn new(label: &str, fragment: &str, expectation: Expectation) -> Self {
        Self {
            label: label.to_string(),
            fragment: fragment.to_string(),
            expectation,
        }
    }
}

/// 名前付きの手順
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeScript {
    pub name: String,
    pub steps: Vec<ProbeStep>,
}

/// 組み込みの手順名
pub const BUILTIN_SCRIPTS: [&str; 4] = ["persistence", "command", "sideload", "undeclared"];

impl ProbeScript {
    /// 宣言・参照・変更・関数定義の永続化を確かめる
    pub fn persistence() -> Self {
        Self {
            name: "persistence".to_string(),
            steps: vec![
                ProbeStep::new("var x = 42", "var x = 42", Expectation::Succeeds),
                ProbeStep::new("print(x)", "print(x)", Expectation::StdoutLine("42".to_string())),
                ProbeStep::new("x = 99", "x = 99", Expectation::Succeeds),
                ProbeStep::new(
                    "print(x) after mutation",
                    "print(x)",
                    Expectation::StdoutLine("99".to_string()),
                ),
                ProbeStep::new(
                    "fn add",
                    "fn add(a: Int, b: Int) -> Int:\n    return a + b",
                    Expectation::Succeeds,
                ),
                ProbeStep::new(
                    "print(add(3,4))",
                    "print(add(3, 4))",
                    Expectation::StdoutLine("7".to_string()),
                ),
            ],
        }
    }

    /// コマンドインタプリタ経由の宣言と参照
    pub fn command() -> Self {
        Self {
            name: "command".to_string(),
            steps: vec![
                ProbeStep::new("HandleCommand var", "var _jtest2 = 99", Expectation::Succeeds),
                ProbeStep::new(
                    "HandleCommand use var",
                    "print(_jtest2)",
                    Expectation::StdoutLine("99".to_string()),
                ),
            ],
        }
    }

    /// 補助ライブラリを読み込んだ状態での宣言と参照
    pub fn sideload() -> Self {
        Self {
            name: "sideload".to_string(),
            steps: vec![
                ProbeStep::new("var declaration", "var _jtest = 42", Expectation::Succeeds),
                ProbeStep::new(
                    "use var",
                    "print(_jtest)",
                    Expectation::StdoutLine("42".to_string()),
                ),
            ],
        }
    }

    /// 未宣言の名前への代入が失敗し、後続が続行されることを確かめる
    pub fn undeclared() -> Self {
        Self {
            name: "undeclared".to_string(),
            steps: vec![
                ProbeStep::new("assign undeclared", "_undeclared_probe = 99", Expectation::Fails),
                ProbeStep::new("continue after failure", "print(1)", Expectation::StdoutLine("1".to_string())),
            ],
        }
    }

    /// 組み込みの手順を名前で引く
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "persistence" => Some(Self::persistence()),
            "command" => Some(Self::command()),
            "sideload" => Some(Self::sideload()),
            "undeclared" => Some(Self::undeclared()),
            _ => None,
        }
    }
}

/// 1ステップの実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: ProbeStep,
    pub result: EvaluationResult,
    pub expectation_held: bool,
}

/// 永続化の観測結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// 宣言が後の評価から見えた
    Held,
    /// 宣言は成功したが後の評価から見えなかった
    Lost,
    /// 宣言自体が失敗した
    Inconclusive,
    /// 手順に観測点がない
    NotProbed,
}

impl Persistence {
    /// 手順の結果から永続化を判定する
    ///
    /// 観測点は `StdoutLine` を期待するステップで、そこまでに宣言が成功していることが前提です。
    pub fn observe(reports: &[StepReport]) -> Self {
        let mut verdict = Persistence::NotProbed;
        let mut declared = false;
        for report in reports {
            match &report.step.expectation {
                Expectation::Succeeds if report.step.fragment.trim_start().starts_with("var ") => {
                    if !report.result.succeeded {
                        return Persistence::Inconclusive;
                    }
                    declared = true;
                }
                Expectation::StdoutLine(_) if declared => {
                    if !report.expectation_held {
                        return Persistence::Lost;
                    }
                    verdict = Persistence::Held;
                }
                _ => {}
            }
        }
        verdict
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persistence::Held => f.write_str("persisted"),
            Persistence::Lost => f.write_str("did not persist"),
            Persistence::Inconclusive => f.write_str("inconclusive (declaration failed)"),
            Persistence::NotProbed => f.write_str("not probed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(step: ProbeStep, succeeded: bool, stdout: &str) -> StepReport {
        let result = EvaluationResult {
            succeeded,
            error_message: if succeeded { String::new() } else { "error: x".to_string() },
            captured_stdout: stdout.to_string(),
            ..Default::default()
        };
        let expectation_held = step.expectation.holds(&result);
        StepReport {
            step,
            result,
            expectation_held,
        }
    }

    #[test]
    fn test_builtin_scripts() {
        for name in BUILTIN_SCRIPTS {
            let script = ProbeScript::by_name(name).unwrap();
            assert_eq!(script.name, name);
            assert!(!script.steps.is_empty());
        }
        assert!(ProbeScript::by_name("nope").is_none());
    }

    #[test]
    fn test_expectation_holds() {
        let ok = EvaluationResult {
            succeeded: true,
            captured_stdout: "42\n".to_string(),
            ..Default::default()
        };
        assert!(Expectation::Any.holds(&ok));
        assert!(Expectation::Succeeds.holds(&ok));
        assert!(!Expectation::Fails.holds(&ok));
        assert!(Expectation::StdoutLine("42".to_string()).holds(&ok));
        assert!(!Expectation::StdoutLine("99".to_string()).holds(&ok));
        assert!(!Expectation::StdoutLine("4".to_string()).holds(&ok));

        let ten = EvaluationResult {
            succeeded: true,
            captured_stdout: "noise\n  10  \n".to_string(),
            ..Default::default()
        };
        assert!(!Expectation::StdoutLine("1".to_string()).holds(&ten));
        assert!(Expectation::StdoutLine("10".to_string()).holds(&ten));

        let failed = EvaluationResult::failure("error: use of unknown declaration 'x'");
        assert!(Expectation::Fails.holds(&failed));
        assert!(!Expectation::Succeeds.holds(&failed));
    }

    #[test]
    fn test_observe_persistence() {
        let steps = ProbeScript::persistence().steps;
        let held = vec![
            report(steps[0].clone(), true, ""),
            report(steps[1].clone(), true, "42\n"),
        ];
        assert_eq!(Persistence::observe(&held), Persistence::Held);

        let lost = vec![
            report(steps[0].clone(), true, ""),
            report(steps[1].clone(), false, ""),
        ];
        assert_eq!(Persistence::observe(&lost), Persistence::Lost);

        let inconclusive = vec![report(steps[0].clone(), false, "")];
        assert_eq!(Persistence::observe(&inconclusive), Persistence::Inconclusive);

        let steps = ProbeScript::undeclared().steps;
        let none = vec![
            report(steps[0].clone(), false, ""),
            report(steps[1].clone(), true, "1\n"),
        ];
        assert_eq!(Persistence::observe(&none), Persistence::NotProbed);
    }
}
