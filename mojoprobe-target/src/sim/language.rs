//! 模擬バックエンドが解釈する小さな言語
//!
//! 対応する文:
//! - `var name = expr`（型注釈 `var name: Int = expr` も可）
//! - `name = expr`
//! - `fn name(a: Int, b: Int) -> Int:` の後にインデントされた `return expr`
//! - 式文（`print(...)` など）
//!
//! 式は整数・文字列リテラル・名前・関数呼び出し・`+ - * /`・括弧を扱います。

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// 値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    None,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::None => f.write_str("None"),
        }
    }
}

/// ユーザー定義関数
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    params: Vec<String>,
    body: Expr,
}

/// 束縛の集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: HashMap<String, Value>,
    functions: HashMap<String, Function>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.vars.contains_key(name) || self.functions.contains_key(name)
    }
}

/// 評価エラー（メッセージのみ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError(pub String);

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type EvalResult<T> = std::result::Result<T, EvalError>;

fn err<T>(message: impl Into<String>) -> EvalResult<T> {
    Err(EvalError(message.into()))
}

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^var\s+([A-Za-z_]\w*)(?:\s*:\s*\w+)?\s*=\s*(.+)$").unwrap())
}

fn assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*([^=].*)$").unwrap())
}

fn fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^fn\s+([A-Za-z_]\w*)\s*\(([^)]*)\)(?:\s*->\s*\w+)?\s*:$").unwrap()
    })
}

fn return_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^return\s+(.+)$").unwrap())
}

/// 断片を実行する
///
/// 束縛は `scope` に直接書き込まれ、途中でエラーになっても
/// それまでの文の効果は残ります。`print` の出力は `stdout` に追記されます。
/// 最後の式文の値を返します。
pub fn execute(fragment: &str, scope: &mut Scope, stdout: &mut Vec<u8>) -> EvalResult<Option<Value>> {
    let lines: Vec<&str> = fragment.lines().collect();
    let mut last = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim_end();
        i += 1;
        let stmt = line.trim();
        if stmt.is_empty() || stmt.starts_with('#') {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            return err(format!("unexpected indentation: '{}'", stmt));
        }

        if let Some(caps) = fn_re().captures(stmt) {
            // インデントされた本体を集める
            let mut body = Vec::new();
            while i < lines.len() && (lines[i].starts_with(char::is_whitespace) || lines[i].trim().is_empty()) {
                if !lines[i].trim().is_empty() {
                    body.push(lines[i].trim());
                }
                i += 1;
            }
            define_function(scope, &caps[1], &caps[2], &body)?;
            last = None;
        } else if let Some(caps) = var_re().captures(stmt) {
            let name = &caps[1];
            if scope.is_declared(name) {
                return err(format!("invalid redefinition of '{}'", name));
            }
            let value = eval(&parse_expr(&caps[2])?, scope, &HashMap::new(), stdout, 0)?;
            scope.vars.insert(name.to_string(), value);
            last = None;
        } else if let Some(caps) = assign_re().captures(stmt) {
            let name = &caps[1];
            if !scope.vars.contains_key(name) {
                return err(format!("use of unknown declaration '{}'", name));
            }
            let value = eval(&parse_expr(&caps[2])?, scope, &HashMap::new(), stdout, 0)?;
            scope.vars.insert(name.to_string(), value);
            last = None;
        } else if stmt.starts_with("struct ") || stmt.starts_with("trait ") {
            return err(format!("unsupported declaration: '{}'", stmt));
        } else {
            let value = eval(&parse_expr(stmt)?, scope, &HashMap::new(), stdout, 0)?;
            last = match value {
                Value::None => None,
                v => Some(v),
            };
        }
    }

    Ok(last)
}

fn define_function(scope: &mut Scope, name: &str, params: &str, body: &[&str]) -> EvalResult<()> {
    if scope.is_declared(name) {
        return err(format!("invalid redefinition of '{}'", name));
    }

    let params: Vec<String> = params
        .split(',')
        .map(|p| p.split(':').next().unwrap_or("").trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let ret = match body {
        [only] => return_re()
            .captures(only)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| EvalError(format!("unsupported function body in '{}'", name)))?,
        [] => return err(format!("expected function body for '{}'", name)),
        _ => return err(format!("unsupported function body in '{}'", name)),
    };

    scope.functions.insert(
        name.to_string(),
        Function {
            params,
            body: parse_expr(&ret)?,
        },
    );
    Ok(())
}

/// 式の構文木
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Int(i64),
    Str(String),
    Name(String),
    Call(String, Vec<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(char),
}

fn tokenize(input: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse()
                .map_err(|_| EvalError(format!("integer literal '{}' out of range", text)))?;
            tokens.push(Token::Int(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i >= chars.len() {
                return err("unterminated string literal");
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else if "+-*/(),".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else {
            return err(format!("unexpected character '{}'", c));
        }
    }

    Ok(tokens)
}

fn parse_expr(input: &str) -> EvalResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.binary(0)?;
    if parser.pos != parser.tokens.len() {
        return err(format!("unexpected token in '{}'", input.trim()));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, op: char) -> EvalResult<()> {
        match self.next() {
            Some(Token::Op(c)) if c == op => Ok(()),
            _ => err(format!("expected '{}'", op)),
        }
    }

    fn binary(&mut self, min_prec: u8) -> EvalResult<Expr> {
        let mut lhs = self.primary()?;
        loop {
            let (op, prec) = match self.peek() {
                Some(Token::Op(c @ ('+' | '-'))) => (*c, 1),
                Some(Token::Op(c @ ('*' | '/'))) => (*c, 2),
                _ => break,
            };
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Op('-')) => {
                let operand = self.primary()?;
                Ok(Expr::Binary('-', Box::new(Expr::Int(0)), Box::new(operand)))
            }
            Some(Token::Op('(')) => {
                let inner = self.binary(0)?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::Op('(')) {
                    return Ok(Expr::Name(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::Op(')')) {
                    self.pos += 1;
                    return Ok(Expr::Call(name, args));
                }
                loop {
                    args.push(self.binary(0)?);
                    match self.next() {
                        Some(Token::Op(',')) => continue,
                        Some(Token::Op(')')) => break,
                        _ => return err("expected ',' or ')' in argument list"),
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Some(token) => err(format!("unexpected token {:?}", token)),
            None => err("unexpected end of expression"),
        }
    }
}

/// 関数呼び出しの入れ子の上限
const MAX_CALL_DEPTH: usize = 256;

/// 式を評価する（`depth` は呼び出し中の関数の数）
fn eval(
    expr: &Expr,
    scope: &Scope,
    locals: &HashMap<String, Value>,
    stdout: &mut Vec<u8>,
    depth: usize,
) -> EvalResult<Value> {
    match expr {
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Name(name) => locals
            .get(name)
            .or_else(|| scope.vars.get(name))
            .cloned()
            .ok_or_else(|| EvalError(format!("use of unknown declaration '{}'", name))),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope, locals, stdout, depth)?;
            let rhs = eval(rhs, scope, locals, stdout, depth)?;
            binary(*op, lhs, rhs)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, scope, locals, stdout, depth))
                .collect::<EvalResult<Vec<_>>>()?;

            if name == "print" {
                let line = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
                stdout.extend_from_slice(line.as_bytes());
                stdout.push(b'\n');
                return Ok(Value::None);
            }

            let function = scope
                .functions
                .get(name)
                .ok_or_else(|| EvalError(format!("use of unknown declaration '{}'", name)))?;
            if function.params.len() != values.len() {
                return err(format!(
                    "'{}' expects {} arguments, but {} were specified",
                    name,
                    function.params.len(),
                    values.len()
                ));
            }
            if depth >= MAX_CALL_DEPTH {
                return err("recursion limit exceeded");
            }
            let frame: HashMap<String, Value> =
                function.params.iter().cloned().zip(values).collect();
            eval(&function.body, scope, &frame, stdout, depth + 1)
        }
    }
}

fn binary(op: char, lhs: Value, rhs: Value) -> EvalResult<Value> {
    match (op, lhs, rhs) {
        ('+', Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (op, Value::Int(a), Value::Int(b)) => {
            let result = match op {
                '+' => a.checked_add(b),
                '-' => a.checked_sub(b),
                '*' => a.checked_mul(b),
                '/' if b == 0 => return err("division by zero"),
                '/' => a.checked_div(b),
                _ => None,
            };
            result
                .map(Value::Int)
                .ok_or_else(|| EvalError("integer overflow".to_string()))
        }
        (op, a, b) => err(format!("invalid operands to '{}': {} and {}", op, a, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fragment: &str, scope: &mut Scope) -> (EvalResult<Option<Value>>, String) {
        let mut out = Vec::new();
        let result = execute(fragment, scope, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_declare_and_print() {
        let mut scope = Scope::default();
        let (r, out) = run("var x = 42", &mut scope);
        assert_eq!(r, Ok(None));
        assert_eq!(out, "");
        let (r, out) = run("print(x)", &mut scope);
        assert_eq!(r, Ok(None));
        assert_eq!(out, "42\n");
    }

    #[test]
    fn test_mutation() {
        let mut scope = Scope::default();
        run("var x = 42", &mut scope).0.unwrap();
        run("x = 99", &mut scope).0.unwrap();
        assert_eq!(scope.get("x"), Some(&Value::Int(99)));
    }

    #[test]
    fn test_function_definition_and_call() {
        let mut scope = Scope::default();
        let (r, _) = run("fn add(a: Int, b: Int) -> Int:\n    return a + b", &mut scope);
        assert_eq!(r, Ok(None));
        let (_, out) = run("print(add(3, 4))", &mut scope);
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_unknown_declaration() {
        let mut scope = Scope::default();
        let (r, _) = run("x = 99", &mut scope);
        assert_eq!(r, Err(EvalError("use of unknown declaration 'x'".to_string())));
        let (r, _) = run("print(y)", &mut scope);
        assert!(r.is_err());
    }

    #[test]
    fn test_partial_effects_remain() {
        let mut scope = Scope::default();
        let (r, out) = run("var a = 1\nprint(a)\nprint(missing)\nvar b = 2", &mut scope);
        assert!(r.is_err());
        assert_eq!(out, "1\n");
        assert_eq!(scope.get("a"), Some(&Value::Int(1)));
        assert_eq!(scope.get("b"), None);
    }

    #[test]
    fn test_expression_value_and_precedence() {
        let mut scope = Scope::default();
        let (r, _) = run("3 * 7 + 1", &mut scope);
        assert_eq!(r, Ok(Some(Value::Int(22))));
        let (r, _) = run("(1 + 2) * -3", &mut scope);
        assert_eq!(r, Ok(Some(Value::Int(-9))));
        let (_, out) = run("print(\"hello world\")\nprint(\"a\", 1)", &mut scope);
        assert_eq!(out, "hello world\na 1\n");
    }

    #[test]
    fn test_unbounded_recursion_is_an_error() {
        let mut scope = Scope::default();
        let (r, _) = run("fn f(n: Int) -> Int:\n    return f(n)", &mut scope);
        assert!(r.is_ok());
        let (r, _) = run("f(1)", &mut scope);
        assert_eq!(r, Err(EvalError("recursion limit exceeded".to_string())));

        // 上限の内側の入れ子は評価できる
        let (r, _) = run("fn g(n: Int) -> Int:\n    return n + 1\nprint(g(g(g(1))))", &mut scope);
        assert!(r.is_ok());
    }

    #[test]
    fn test_redefinition() {
        let mut scope = Scope::default();
        run("var x = 1", &mut scope).0.unwrap();
        let (r, _) = run("var x = 2", &mut scope);
        assert_eq!(r, Err(EvalError("invalid redefinition of 'x'".to_string())));
    }
}
