use std::cmp::Ordering;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, warn};

/// Values the environment-marker variables take for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    pub python_full_version: Option<String>,
    pub sys_platform: String,
    pub platform_system: String,
    pub platform_machine: String,
    pub os_name: String,
    pub implementation_name: String,
}

impl MarkerEnvironment {
    /// Environment of the host, with the given interpreter version.
    pub fn current(python_full_version: Option<String>) -> Self {
        let (sys_platform, platform_system) = match std::env::consts::OS {
            "macos" => ("darwin", "Darwin"),
            "windows" => ("win32", "Windows"),
            "linux" => ("linux", "Linux"),
            other => (other, other),
        };
        Self {
            python_full_version,
            sys_platform: sys_platform.to_string(),
            platform_system: platform_system.to_string(),
            platform_machine: std::env::consts::ARCH.to_string(),
            os_name: if cfg!(windows) { "nt" } else { "posix" }.to_string(),
            implementation_name: "cpython".to_string(),
        }
    }

    fn python_version(&self) -> Option<String> {
        let full = self.python_full_version.as_deref()?;
        let mut parts = full.split('.');
        Some(format!("{}.{}", parts.next()?, parts.next().unwrap_or("0")))
    }

    fn lookup(&self, variable: &str) -> Result<String> {
        let value = match variable {
            "python_version" => self.python_version(),
            "python_full_version" => self.python_full_version.clone(),
            "sys_platform" => Some(self.sys_platform.clone()),
            "platform_system" => Some(self.platform_system.clone()),
            "platform_machine" => Some(self.platform_machine.clone()),
            "os_name" => Some(self.os_name.clone()),
            "implementation_name" => Some(self.implementation_name.clone()),
            _ => bail!("unsupported marker variable `{}`", variable),
        };
        value.ok_or_else(|| anyhow!("no value known for `{}`", variable))
    }
}

/// Ask `python3 --version` for the interpreter version.
pub async fn detect_python_version() -> Option<String> {
    let output = tokio::process::Command::new("python3")
        .arg("--version")
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            // Older interpreters print the version on stderr.
            let text = if out.stdout.is_empty() { out.stderr } else { out.stdout };
            let version = String::from_utf8_lossy(&text)
                .trim()
                .strip_prefix("Python ")
                .map(str::to_string);
            debug!("Detected python version {:?}", version);
            version
        }
        Ok(out) => {
            warn!("python3 --version exited with {}", out.status);
            None
        }
        Err(e) => {
            warn!("Could not run python3 to detect its version: {}", e);
            None
        }
    }
}

/// Evaluate a PEP 508 environment marker.
///
/// Errors when the marker is malformed or references a variable with no
/// known value.
pub fn evaluate(marker: &str, env: &MarkerEnvironment) -> Result<bool> {
    let tokens = tokenize(marker)?;
    let mut parser = MarkerParser {
        tokens,
        pos: 0,
        env,
    };
    let result = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        bail!("unexpected trailing input in marker `{}`", marker);
    }
    Ok(result)
}

#[derive(Debug, PartialEq, Clone)]
enum Token {
    Ident(String),
    Str(String),
    Op(String),
    LParen,
    RParen,
}

fn tokenize(marker: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = marker.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            tokens.push(Token::LParen);
            chars.next();
        } else if c == ')' {
            tokens.push(Token::RParen);
            chars.next();
        } else if c == '"' || c == '\'' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some(q) if q == c => break,
                    Some(ch) => s.push(ch),
                    None => bail!("unterminated string in marker `{}`", marker),
                }
            }
            tokens.push(Token::Str(s));
        } else if "=!<>~".contains(c) {
            let mut op = String::new();
            while let Some(&ch) = chars.peek() {
                if !"=!<>~".contains(ch) {
                    break;
                }
                op.push(ch);
                chars.next();
            }
            tokens.push(Token::Op(op));
        } else if c.is_alphanumeric() || c == '_' || c == '.' {
            let mut s = String::new();
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_' || ch == '.') {
                    break;
                }
                s.push(ch);
                chars.next();
            }
            tokens.push(Token::Ident(s));
        } else {
            bail!("unexpected character `{}` in marker `{}`", c, marker);
        }
    }
    Ok(tokens)
}

/// Recursive descent evaluator (`and` binds tighter than `or`):
/// ```text
/// or_expr  := and_expr ( "or" and_expr )*
/// and_expr := atom ( "and" atom )*
/// atom     := "(" or_expr ")" | value op value
/// ```
struct MarkerParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    env: &'a MarkerEnvironment,
}

impl<'a> MarkerParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    // Both sides are always evaluated so malformed markers are reported.
    fn parse_or(&mut self) -> Result<bool> {
        let mut result = self.parse_and()?;
        while self.peek_keyword("or") {
            self.consume();
            let rhs = self.parse_and()?;
            result = result || rhs;
        }
        Ok(result)
    }

    fn parse_and(&mut self) -> Result<bool> {
        let mut result = self.parse_atom()?;
        while self.peek_keyword("and") {
            self.consume();
            let rhs = self.parse_atom()?;
            result = result && rhs;
        }
        Ok(result)
    }

    fn parse_atom(&mut self) -> Result<bool> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.consume();
            let result = self.parse_or()?;
            if self.consume() != Some(Token::RParen) {
                bail!("missing closing parenthesis");
            }
            return Ok(result);
        }

        let lhs = self.parse_value()?;
        let op = self.parse_op()?;
        let rhs = self.parse_value()?;
        compare(&lhs, &op, &rhs)
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.consume() {
            Some(Token::Str(s)) => Ok(Value::Literal(s)),
            Some(Token::Ident(name)) => {
                let value = self.env.lookup(&name)?;
                Ok(Value::Variable { name, value })
            }
            other => bail!("expected a marker value, found {:?}", other),
        }
    }

    fn parse_op(&mut self) -> Result<String> {
        match self.consume() {
            Some(Token::Op(op)) => Ok(op),
            Some(Token::Ident(s)) if s == "in" => Ok("in".to_string()),
            Some(Token::Ident(s)) if s == "not" => match self.consume() {
                Some(Token::Ident(s)) if s == "in" => Ok("not in".to_string()),
                other => bail!("expected `in` after `not`, found {:?}", other),
            },
            other => bail!("expected a marker operator, found {:?}", other),
        }
    }
}

enum Value {
    Literal(String),
    Variable { name: String, value: String },
}

impl Value {
    fn text(&self) -> &str {
        match self {
            Value::Literal(s) => s,
            Value::Variable { value, .. } => value,
        }
    }

    fn is_version(&self) -> bool {
        matches!(self, Value::Variable { name, .. }
            if name == "python_version" || name == "python_full_version")
    }
}

fn compare(lhs: &Value, op: &str, rhs: &Value) -> Result<bool> {
    let (l, r) = (lhs.text(), rhs.text());
    match op {
        "in" => return Ok(r.contains(l)),
        "not in" => return Ok(!r.contains(l)),
        "===" => return Ok(l == r),
        _ => {}
    }

    if lhs.is_version() || rhs.is_version() {
        return compare_versions(l, op, r);
    }

    Ok(match op {
        "==" => l == r,
        "!=" => l != r,
        "<" => l < r,
        "<=" => l <= r,
        ">" => l > r,
        ">=" => l >= r,
        _ => bail!("operator `{}` is not valid for `{}` and `{}`", op, l, r),
    })
}

fn release(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|seg| {
            let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_versions(version: &str, op: &str, spec: &str) -> Result<bool> {
    let actual = release(version);

    if let Some(prefix) = spec.strip_suffix(".*") {
        let prefix = release(prefix);
        let matches = actual.len() >= prefix.len() && actual[..prefix.len()] == prefix[..];
        return match op {
            "==" => Ok(matches),
            "!=" => Ok(!matches),
            _ => bail!("wildcard versions only support == and !="),
        };
    }

    let wanted = release(spec);
    let ord = cmp_release(&actual, &wanted);
    Ok(match op {
        "==" => ord == Ordering::Equal,
        "!=" => ord != Ordering::Equal,
        "<" => ord == Ordering::Less,
        "<=" => ord != Ordering::Greater,
        ">" => ord == Ordering::Greater,
        ">=" => ord != Ordering::Less,
        "~=" => {
            if wanted.len() < 2 {
                bail!("`~=` needs at least two release segments");
            }
            let prefix = &wanted[..wanted.len() - 1];
            ord != Ordering::Less && cmp_release(&actual[..prefix.len().min(actual.len())], prefix) == Ordering::Equal
        }
        _ => bail!("unknown version operator `{}`", op),
    })
}
