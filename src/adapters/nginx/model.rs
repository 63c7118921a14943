//! Minimal nginx configuration AST: directives with arguments and optional
//! blocks. `*_by_lua_block` bodies are kept verbatim.
use std::fmt::Write;

use crate::{
    core::provider::ProviderId,
    ports::translator::{TranslateError, TranslateResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Option<Vec<Directive>>,
    /// Raw body of a `*_by_lua_block`.
    pub lua: Option<String>,
}

impl Directive {
    pub fn new<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn block<I, S>(name: &str, args: I, children: Vec<Directive>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            block: Some(children),
            ..Self::new(name, args)
        }
    }

    pub fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Block without arguments (`server { ... }`).
    pub fn section(name: &str, children: Vec<Directive>) -> Self {
        Self {
            block: Some(children),
            ..Self::bare(name)
        }
    }

    pub fn lua(name: &str, body: String) -> Self {
        Self {
            name: name.to_string(),
            lua: Some(body),
            ..Self::default()
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn children(&self) -> &[Directive] {
        self.block.as_deref().unwrap_or_default()
    }

    /// Value of a `key=value` argument.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find_map(|a| a.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.args.iter().any(|a| a == name)
    }
}

pub fn find<'a>(directives: &'a [Directive], name: &str) -> Option<&'a Directive> {
    directives.iter().find(|d| d.name == name)
}

pub fn find_all<'a>(directives: &'a [Directive], name: &'a str) -> impl Iterator<Item = &'a Directive> {
    directives.iter().filter(move |d| d.name == name)
}

fn needs_quotes(arg: &str) -> bool {
    arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '#' | '"' | '\'' | '\\'))
}

fn quote(arg: &str) -> String {
    if needs_quotes(arg) {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Render directives with four-space indentation.
pub fn render(directives: &[Directive]) -> String {
    let mut out = String::new();
    render_into(&mut out, directives, 0);
    out
}

fn render_into(out: &mut String, directives: &[Directive], depth: usize) {
    let indent = "    ".repeat(depth);
    for directive in directives {
        let mut head = directive.name.clone();
        for arg in &directive.args {
            head.push(' ');
            head.push_str(&quote(arg));
        }
        if let Some(body) = &directive.lua {
            let _ = writeln!(out, "{indent}{head} {{");
            for line in body.lines() {
                if line.is_empty() {
                    out.push('\n');
                } else {
                    let _ = writeln!(out, "{indent}    {line}");
                }
            }
            let _ = writeln!(out, "{indent}}}");
        } else if let Some(children) = &directive.block {
            let _ = writeln!(out, "{indent}{head} {{");
            render_into(out, children, depth + 1);
            let _ = writeln!(out, "{indent}}}");
            if depth == 0 {
                out.push('\n');
            }
        } else {
            let _ = writeln!(out, "{indent}{head};");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Semicolon,
    Open,
    Close,
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> TranslateError {
        TranslateError::parse(
            ProviderId::Nginx,
            format!("line {}: {}", self.line, message.into()),
        )
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_blank(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> TranslateResult<Option<Token>> {
        self.skip_blank();
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        match c {
            ';' => {
                self.bump();
                Ok(Some(Token::Semicolon))
            }
            '{' => {
                self.bump();
                Ok(Some(Token::Open))
            }
            '}' => {
                self.bump();
                Ok(Some(Token::Close))
            }
            '"' | '\'' => {
                self.bump();
                let mut word = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated string")),
                        Some('\\') => {
                            if let Some(escaped) = self.bump() {
                                word.push(escaped);
                            }
                        }
                        Some(q) if q == c => break,
                        Some(other) => word.push(other),
                    }
                }
                Ok(Some(Token::Word(word)))
            }
            _ => {
                let mut word = String::new();
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || matches!(c, ';' | '{' | '}') {
                        break;
                    }
                    // `${var}` keeps its braces
                    if c == '$' && self.text[self.pos..].starts_with("${") {
                        if let Some(end) = self.text[self.pos..].find('}') {
                            word.push_str(&self.text[self.pos..self.pos + end + 1]);
                            self.pos += end + 1;
                            continue;
                        }
                    }
                    word.push(c);
                    self.bump();
                }
                Ok(Some(Token::Word(word)))
            }
        }
    }

    /// Raw text up to the brace closing a Lua block, skipping braces inside
    /// Lua strings and comments.
    fn lua_body(&mut self) -> TranslateResult<String> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let body = &self.text[start..self.pos - 1];
                        return Ok(dedent(body));
                    }
                }
                '"' | '\'' => {
                    while let Some(inner) = self.bump() {
                        if inner == '\\' {
                            self.bump();
                        } else if inner == c || inner == '\n' {
                            break;
                        }
                    }
                }
                '-' if self.peek() == Some('-') => {
                    while let Some(inner) = self.bump() {
                        if inner == '\n' {
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unterminated lua block"))
    }

    fn directives(&mut self, nested: bool) -> TranslateResult<Vec<Directive>> {
        let mut out = Vec::new();
        loop {
            let Some(token) = self.token()? else {
                if nested {
                    return Err(self.error("unexpected end of input, missing '}'"));
                }
                return Ok(out);
            };
            let name = match token {
                Token::Word(word) => word,
                Token::Close if nested => return Ok(out),
                Token::Close => return Err(self.error("unexpected '}'")),
                Token::Semicolon => continue,
                Token::Open => return Err(self.error("block without a directive name")),
            };
            let mut args = Vec::new();
            loop {
                match self.token()? {
                    Some(Token::Word(arg)) => args.push(arg),
                    Some(Token::Semicolon) => {
                        out.push(Directive {
                            name,
                            args,
                            ..Directive::default()
                        });
                        break;
                    }
                    Some(Token::Open) if name.ends_with("_by_lua_block") => {
                        let body = self.lua_body()?;
                        out.push(Directive {
                            name,
                            args,
                            lua: Some(body),
                            ..Directive::default()
                        });
                        break;
                    }
                    Some(Token::Open) => {
                        let children = self.directives(true)?;
                        out.push(Directive {
                            name,
                            args,
                            block: Some(children),
                            lua: None,
                        });
                        break;
                    }
                    Some(Token::Close) | None => {
                        return Err(self.error(format!("directive '{name}' is missing ';'")));
                    }
                }
            }
        }
    }
}

/// Strip the common leading indentation of a block body.
fn dedent(body: &str) -> String {
    let body = body.trim_matches('\n');
    let indent = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::new();
    for line in body.lines() {
        out.push_str(line.get(indent..).unwrap_or(line.trim_start()));
        out.push('\n');
    }
    out
}

/// Parse configuration text into directives.
pub fn parse(text: &str) -> TranslateResult<Vec<Directive>> {
    let mut parser = Parser {
        text,
        pos: 0,
        line: 1,
    };
    parser.directives(false)
}
