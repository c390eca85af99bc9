//! 路由键通配模式（GlobPattern）
//!
//! 订阅时一次性编译为 `glob::Pattern`，发布时仅做匹配：
//! - `*` 匹配任意长度（含空）的字符序列，`?` 恰好匹配一个字符；
//! - 区分大小写，整串锚定匹配，`.` 与 `/` 都是普通字符；
//! - `\*`、`\?`、`\\` 表示字面量，其它转义与末尾孤立的 `\` 非法；
//! - `[`、`]` 只是普通字符，不构成字符类；
//! - 空模式、含空白或控制字符的模式非法。
//!
use crate::error::{EventError, EventResult};
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::str::FromStr;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    AnyOne,
    AnyRun,
}

/// 已编译的通配模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    compiled: Pattern,
    literal: bool,
    everything: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> EventResult<Self> {
        let tokens = tokenize(pattern)?;

        // 只有 `*` 与 `?` 交给 glob 解释，其余字符一律转义
        let mut translated = String::with_capacity(pattern.len() + 8);
        for token in &tokens {
            match token {
                Token::AnyRun => translated.push('*'),
                Token::AnyOne => translated.push('?'),
                Token::Char(c) => {
                    let mut buf = [0; 4];
                    translated.push_str(&Pattern::escape(c.encode_utf8(&mut buf)));
                }
            }
        }
        let compiled = Pattern::new(&translated)
            .map_err(|e| EventError::invalid_pattern(pattern, e.msg))?;

        Ok(Self {
            source: pattern.to_string(),
            compiled,
            literal: tokens.iter().all(|t| matches!(t, Token::Char(_))),
            everything: tokens == [Token::AnyRun],
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 是否为 `*`（匹配一切）
    pub fn matches_everything(&self) -> bool {
        self.everything
    }

    /// 是否不含通配符
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn matches(&self, key: &str) -> bool {
        self.compiled.matches_with(key, MATCH_OPTIONS)
    }
}

fn tokenize(pattern: &str) -> EventResult<Vec<Token>> {
    if pattern.is_empty() {
        return Err(EventError::invalid_pattern(pattern, "pattern is empty"));
    }

    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c.is_whitespace() || c.is_control() {
            return Err(EventError::invalid_pattern(
                pattern,
                "whitespace and control characters are not allowed",
            ));
        }
        let token = match c {
            '*' => {
                // 连续的 `*` 等价于一个
                if tokens.last() == Some(&Token::AnyRun) {
                    continue;
                }
                Token::AnyRun
            }
            '?' => Token::AnyOne,
            '\\' => match chars.next() {
                Some(escaped @ ('*' | '?' | '\\')) => Token::Char(escaped),
                Some(other) => {
                    return Err(EventError::invalid_pattern(
                        pattern,
                        format!("unsupported escape sequence \\{other}"),
                    ));
                }
                None => {
                    return Err(EventError::invalid_pattern(pattern, "trailing escape"));
                }
            },
            c => Token::Char(c),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for GlobPattern {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
