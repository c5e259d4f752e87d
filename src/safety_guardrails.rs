//! Safety Guardrails
//!
//! Deterministic gate every candidate must pass before it is handed to a human
//! for execution: a single, read-only, bounded SELECT. No model calls.
//!
//! The statement is lexed with sqlparser's MySQL tokenizer, so comments are
//! dropped and words inside string literals or quoted identifiers never count
//! as keywords. MySQL-specific comment forms are resolved first: `#` comments
//! are removed and the body of a `/*! ... */` executable comment is checked as
//! part of the statement, since the server runs it.

use crate::config::ValidatorPolicy;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError, Whitespace};
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

/// Keywords that may not appear anywhere in an accepted statement.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "ALTER", "DROP", "TRUNCATE", "CREATE", "GRANT",
    "REVOKE", "LOCK", "UNLOCK", "RENAME", "CALL", "SET", "USE", "OUTFILE", "DUMPFILE",
];

/// Functions whose result collapses all input rows into one.
pub const AGGREGATE_FUNCTIONS: &[&str] = &[
    "COUNT", "SUM", "AVG", "MIN", "MAX", "GROUP_CONCAT", "STDDEV", "STDDEV_POP", "STDDEV_SAMP",
    "VARIANCE", "VAR_POP", "VAR_SAMP", "BIT_AND", "BIT_OR", "BIT_XOR",
];

const SET_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];
const SELECT_MODIFIERS: &[&str] = &["ALL", "DISTINCT", "DISTINCTROW", "HIGH_PRIORITY", "STRAIGHT_JOIN"];
const LITERAL_WORDS: &[&str] = &["NULL", "TRUE", "FALSE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    NotASelect,
    ContainsMutatingKeyword,
    MultipleStatements,
    MissingBound,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::NotASelect => "NotASelect",
            ViolationKind::ContainsMutatingKeyword => "ContainsMutatingKeyword",
            ViolationKind::MultipleStatements => "MultipleStatements",
            ViolationKind::MissingBound => "MissingBound",
        }
    }

    /// Technical description, fed back to the correction step.
    pub fn describe(&self) -> String {
        match self {
            ViolationKind::NotASelect => {
                "SQL safety validation failed: only SELECT statements are allowed; the query must start with SELECT.".to_string()
            }
            ViolationKind::ContainsMutatingKeyword => format!(
                "SQL safety validation failed: disallowed keyword found. None of {} may appear in the query.",
                BLOCKED_KEYWORDS.join(", ")
            ),
            ViolationKind::MultipleStatements => {
                "SQL safety validation failed: multiple SQL statements are not allowed.".to_string()
            }
            ViolationKind::MissingBound => {
                "SQL safety validation failed: non-aggregate queries must include a LIMIT clause (LIMIT 100 or lower).".to_string()
            }
        }
    }

    /// Plain-language summary for the person who asked the question.
    pub fn user_summary(&self) -> &'static str {
        match self {
            ViolationKind::NotASelect => "the generated query was not a read-only lookup",
            ViolationKind::ContainsMutatingKeyword => {
                "the generated query contained instructions that could change data"
            }
            ViolationKind::MultipleStatements => "the generated answer bundled several queries together",
            ViolationKind::MissingBound => {
                "the query could return an unbounded number of rows (missing LIMIT)"
            }
        }
    }

    /// What the asker can change to get a safe query next time.
    pub fn rephrase_hint(&self) -> &'static str {
        match self {
            ViolationKind::NotASelect | ViolationKind::ContainsMutatingKeyword => {
                "Only questions that read data are supported; try asking what you want to see rather than what to change."
            }
            ViolationKind::MultipleStatements => {
                "Try asking one question at a time."
            }
            ViolationKind::MissingBound => {
                "Try adding a row bound such as \"top 10\" or \"first 50\", or rephrase the question as a count or total."
            }
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationVerdict {
    Accepted,
    Rejected { reason: ViolationKind },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted)
    }

    pub fn reason(&self) -> Option<ViolationKind> {
        match self {
            ValidationVerdict::Accepted => None,
            ValidationVerdict::Rejected { reason } => Some(*reason),
        }
    }

    fn rejected(reason: ViolationKind) -> Self {
        ValidationVerdict::Rejected { reason }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyValidator {
    policy: ValidatorPolicy,
}

impl SafetyValidator {
    pub fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    /// Validate a candidate. Logging never affects the verdict.
    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        let verdict = self.evaluate(sql);
        match verdict {
            ValidationVerdict::Accepted => debug!("Candidate SQL accepted"),
            ValidationVerdict::Rejected { reason } => debug!(
                target: "query_staff::safety",
                sql = %sql,
                violation_kind = %reason,
                "Rejected candidate SQL"
            ),
        }
        verdict
    }

    fn evaluate(&self, sql: &str) -> ValidationVerdict {
        let tokens = match significant_tokens(sql) {
            Ok(tokens) => tokens,
            Err(e) => {
                debug!("Candidate SQL could not be tokenized: {}", e);
                return ValidationVerdict::rejected(ViolationKind::NotASelect);
            }
        };

        let mut end = tokens.len();
        while end > 0 && tokens[end - 1] == Token::SemiColon {
            end -= 1;
        }
        let tokens = &tokens[..end];

        if tokens.is_empty() {
            return ValidationVerdict::rejected(ViolationKind::NotASelect);
        }

        if tokens.iter().any(|t| *t == Token::SemiColon) {
            return ValidationVerdict::rejected(ViolationKind::MultipleStatements);
        }

        if !is_word(&tokens[0], "SELECT") {
            return ValidationVerdict::rejected(ViolationKind::NotASelect);
        }

        if let Some(keyword) = tokens.iter().find_map(blocked_keyword) {
            debug!("Blocked keyword {} in candidate SQL", keyword);
            return ValidationVerdict::rejected(ViolationKind::ContainsMutatingKeyword);
        }

        let top_level = top_level_tokens(tokens);
        let has_limit = top_level.iter().any(|t| is_word(t, "LIMIT"));
        let grouped = has_group_by(&top_level);
        let bounded = has_limit
            || (grouped && self.policy.group_by_counts_as_bound)
            || (!grouped && is_aggregation_only(tokens));

        if !bounded {
            return ValidationVerdict::rejected(ViolationKind::MissingBound);
        }

        ValidationVerdict::Accepted
    }
}

/// Validate with the default policy.
pub fn validate(sql: &str) -> ValidationVerdict {
    SafetyValidator::default().validate(sql)
}

/// Trim surrounding whitespace and any trailing semicolons.
pub fn normalize(sql: &str) -> String {
    let mut normalized = sql.trim();
    while let Some(stripped) = normalized.strip_suffix(';') {
        normalized = stripped.trim_end();
    }
    normalized.to_string()
}

fn significant_tokens(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    let dialect = MySqlDialect {};
    let source = strip_hash_comments(sql);
    let tokens = Tokenizer::new(&dialect, &source).tokenize()?;

    let mut significant = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Whitespace(Whitespace::MultiLineComment(ref body)) => {
                if let Some(code) = executable_comment_body(body) {
                    significant.extend(significant_tokens(code)?);
                }
            }
            Token::Whitespace(_) | Token::EOF => {}
            other => significant.push(other),
        }
    }
    Ok(significant)
}

/// Code inside `/*! ... */` (or MariaDB's `/*M! ... */`), minus the optional version number.
fn executable_comment_body(body: &str) -> Option<&str> {
    let rest = body.strip_prefix('!').or_else(|| body.strip_prefix("M!"))?;
    let version_len = rest.bytes().take(6).take_while(u8::is_ascii_digit).count();
    Some(&rest[version_len..])
}

/// Blank out `#` comments outside literals, quoted identifiers and other comments.
/// The tokenizer would otherwise read their text as code.
fn strip_hash_comments(sql: &str) -> Cow<'_, str> {
    if !sql.contains('#') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '#' => {
                while chars.next_if(|&next| next != '\n').is_some() {}
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                while let Some(next) = chars.next_if(|&next| next != '\n') {
                    out.push(next);
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(c);
                out.push('*');
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    out.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_word(token: &Token, keyword: &str) -> bool {
    match token {
        Token::Word(w) => w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword),
        _ => false,
    }
}

fn is_any_word(token: &Token, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| is_word(token, k))
}

fn blocked_keyword(token: &Token) -> Option<&'static str> {
    BLOCKED_KEYWORDS.iter().copied().find(|k| is_word(token, k))
}

/// Tokens outside any parentheses.
fn top_level_tokens(tokens: &[Token]) -> Vec<&Token> {
    let mut depth = 0usize;
    let mut out = Vec::new();
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(token),
            _ => {}
        }
    }
    out
}

fn has_group_by(top_level: &[&Token]) -> bool {
    top_level
        .windows(2)
        .any(|pair| is_word(pair[0], "GROUP") && is_word(pair[1], "BY"))
}

/// A query is aggregation-only when it has no set operator at the top level and
/// every projected item is built from aggregate calls, with no column referenced
/// outside an aggregate and no window (`OVER`) clause.
fn is_aggregation_only(tokens: &[Token]) -> bool {
    if top_level_tokens(tokens).iter().any(|t| is_any_word(t, SET_OPERATORS)) {
        return false;
    }

    let mut start = 1;
    while start < tokens.len() && is_any_word(&tokens[start], SELECT_MODIFIERS) {
        start += 1;
    }

    let mut depth = 0usize;
    let mut items: Vec<&[Token]> = Vec::new();
    let mut item_start = start;
    let mut projection_end = tokens.len();
    for (idx, token) in tokens.iter().enumerate().skip(start) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                items.push(&tokens[item_start..idx]);
                item_start = idx + 1;
            }
            _ if depth == 0 && is_word(token, "FROM") => {
                projection_end = idx;
                break;
            }
            _ => {}
        }
    }
    items.push(&tokens[item_start..projection_end]);

    items.iter().all(|item| is_aggregate_item(item))
}

fn is_aggregate_item(item: &[Token]) -> bool {
    let expr = strip_alias(item);
    if expr.is_empty() {
        return false;
    }

    let mut saw_aggregate = false;
    let mut depth = 0usize;
    let mut aggregate_depth: Option<usize> = None;

    for (idx, token) in expr.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
                if aggregate_depth == Some(depth) {
                    aggregate_depth = None;
                }
            }
            Token::Word(_) if is_word(token, "OVER") => return false,
            Token::Word(_) if aggregate_depth.is_none() => {
                let calls = matches!(expr.get(idx + 1), Some(Token::LParen));
                if calls && is_any_word(token, AGGREGATE_FUNCTIONS) {
                    saw_aggregate = true;
                    aggregate_depth = Some(depth);
                } else if !calls && !is_any_word(token, LITERAL_WORDS) {
                    // a column (or keyword expression) outside any aggregate
                    return false;
                }
            }
            _ => {}
        }
    }

    saw_aggregate
}

fn strip_alias(item: &[Token]) -> &[Token] {
    let mut depth = 0usize;
    for (idx, token) in item.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && is_word(token, "AS") => return &item[..idx],
            _ => {}
        }
    }

    // implicit alias: `COUNT(*) total`
    if let [rest @ .., before, Token::Word(_)] = item {
        if matches!(before, Token::RParen | Token::Number(_, _)) {
            let keep = rest.len() + 1;
            return &item[..keep];
        }
    }

    item
}
