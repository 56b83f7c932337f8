//! SQL lexer for table and index definitions.
//!
//! Tokens carry their byte span in the source so that CHECK and DEFAULT
//! expressions can be preserved verbatim instead of being re-assembled from
//! tokens.

use std::iter::Peekable;
use std::str::CharIndices;

use schemarepo_core::SchemaError;

/// Reserved words the DDL parser cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Create,
    Temp,
    Table,
    Index,
    Unique,
    If,
    Not,
    Exists,
    Primary,
    Key,
    Foreign,
    References,
    Null,
    Default,
    Autoincrement,
    Check,
    Constraint,
    Collate,
    On,
    Delete,
    Update,
    Cascade,
    Restrict,
    Set,
    No,
    Action,
    Conflict,
    Asc,
    Desc,
    Without,
    True,
    False,
    CurrentTimestamp,
    CurrentDate,
    CurrentTime,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        let keyword = match word.to_ascii_uppercase().as_str() {
            "CREATE" => Self::Create,
            "TEMP" | "TEMPORARY" => Self::Temp,
            "TABLE" => Self::Table,
            "INDEX" => Self::Index,
            "UNIQUE" => Self::Unique,
            "IF" => Self::If,
            "NOT" => Self::Not,
            "EXISTS" => Self::Exists,
            "PRIMARY" => Self::Primary,
            "KEY" => Self::Key,
            "FOREIGN" => Self::Foreign,
            "REFERENCES" => Self::References,
            "NULL" => Self::Null,
            "DEFAULT" => Self::Default,
            "AUTOINCREMENT" | "AUTO_INCREMENT" => Self::Autoincrement,
            "CHECK" => Self::Check,
            "CONSTRAINT" => Self::Constraint,
            "COLLATE" => Self::Collate,
            "ON" => Self::On,
            "DELETE" => Self::Delete,
            "UPDATE" => Self::Update,
            "CASCADE" => Self::Cascade,
            "RESTRICT" => Self::Restrict,
            "SET" => Self::Set,
            "NO" => Self::No,
            "ACTION" => Self::Action,
            "CONFLICT" => Self::Conflict,
            "ASC" => Self::Asc,
            "DESC" => Self::Desc,
            "WITHOUT" => Self::Without,
            "TRUE" => Self::True,
            "FALSE" => Self::False,
            "CURRENT_TIMESTAMP" => Self::CurrentTimestamp,
            "CURRENT_DATE" => Self::CurrentDate,
            "CURRENT_TIME" => Self::CurrentTime,
            _ => return None,
        };
        Some(keyword)
    }
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    /// Bare or quoted identifier. Quoted identifiers never become keywords.
    Ident(String),
    /// Single-quoted string literal, unescaped.
    Str(String),
    Num(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    /// Any other punctuation (operators inside CHECK/DEFAULT expressions).
    Symbol(char),
    Eof,
}

/// A token and its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }
}

/// SQL lexer.
pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn current(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    /// Character after the current one.
    fn lookahead(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next().map(|(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.current().map_or(self.input.len(), |(i, _)| i)
    }

    fn skip_line_comment(&mut self) {
        for (_, c) in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), SchemaError> {
        self.chars.next(); // '/'
        self.chars.next(); // '*'
        while let Some((_, c)) = self.chars.next() {
            if c == '*' && self.current().is_some_and(|(_, n)| n == '/') {
                self.chars.next();
                return Ok(());
            }
        }
        Err(self.malformed(start, "unterminated block comment"))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some((_, c)) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    /// Reads a quoted run where a doubled `close` escapes itself.
    fn read_quoted(&mut self, start: usize, close: char) -> Result<String, SchemaError> {
        self.chars.next(); // opening quote
        let mut text = String::new();
        while let Some((_, c)) = self.chars.next() {
            if c == close {
                if close != ']' && self.current().is_some_and(|(_, n)| n == close) {
                    text.push(c);
                    self.chars.next();
                } else {
                    return Ok(text);
                }
            } else {
                text.push(c);
            }
        }
        Err(self.malformed(start, "unterminated quoted text"))
    }

    fn read_number(&mut self) -> String {
        let mut num = String::new();
        let mut has_dot = false;

        if let Some((_, '-')) = self.current() {
            num.push('-');
            self.chars.next();
        }

        while let Some((_, c)) = self.current() {
            if c.is_ascii_digit() {
                num.push(c);
                self.chars.next();
            } else if c == '.' && !has_dot {
                has_dot = true;
                num.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        num
    }

    fn malformed(&self, start: usize, reason: &str) -> SchemaError {
        let snippet: String = self.input[start..].chars().take(40).collect();
        SchemaError::Malformed {
            statement: snippet,
            reason: reason.to_string(),
        }
    }

    /// Produces the next token.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Malformed`] for unterminated strings, quoted
    /// identifiers and block comments.
    pub fn next_token(&mut self) -> Result<Token, SchemaError> {
        loop {
            let start = self.offset();
            let Some((_, c)) = self.current() else {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    start,
                    end: start,
                });
            };

            let kind = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '-' if self.lookahead() == Some('-') => {
                    self.skip_line_comment();
                    continue;
                }
                '/' if self.lookahead() == Some('*') => {
                    self.skip_block_comment(start)?;
                    continue;
                }
                '-' if self.lookahead().is_some_and(|n| n.is_ascii_digit()) => {
                    TokenKind::Num(self.read_number())
                }
                '(' | ')' | ',' | ';' | '.' => {
                    self.chars.next();
                    match c {
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        ',' => TokenKind::Comma,
                        ';' => TokenKind::Semicolon,
                        _ => TokenKind::Dot,
                    }
                }
                '\'' => TokenKind::Str(self.read_quoted(start, '\'')?),
                '"' => TokenKind::Ident(self.read_quoted(start, '"')?),
                '`' => TokenKind::Ident(self.read_quoted(start, '`')?),
                '[' => TokenKind::Ident(self.read_quoted(start, ']')?),
                c if c.is_ascii_digit() => TokenKind::Num(self.read_number()),
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.read_word();
                    match Keyword::lookup(&word) {
                        Some(keyword) => TokenKind::Keyword(keyword),
                        None => TokenKind::Ident(word),
                    }
                }
                other => {
                    self.chars.next();
                    TokenKind::Symbol(other)
                }
            };

            let end = self.offset();
            return Ok(Token { kind, start, end });
        }
    }

    /// Collects all tokens, ending with [`TokenKind::Eof`].
    pub fn tokenize(&mut self) -> Result<Vec<Token>, SchemaError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}
