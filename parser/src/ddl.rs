//! Parser for `CREATE TABLE` and `CREATE INDEX` statements.
//!
//! Understands the column and table constraints the engine's dialect allows
//! on a table definition. Statements other than `CREATE TABLE` and
//! `CREATE INDEX` are skipped.

use schemarepo_core::{
    Column, ColumnType, DefaultValue, ForeignKey, ForeignKeyAction, Index, SchemaError, Table,
};
use tracing::debug;

use crate::lexer::{Keyword, Lexer, Token, TokenKind};

/// Parses DDL text into tables in declaration order.
///
/// Indexes from `CREATE INDEX` statements are attached to their table,
/// whichever order the statements appear in.
///
/// # Errors
///
/// Returns [`SchemaError::Malformed`] when a statement cannot be parsed,
/// [`SchemaError::UnknownType`] for a column type outside the primitive set,
/// and [`SchemaError::UnknownTable`] / [`SchemaError::UnknownColumn`] for key
/// clauses naming things the statement does not declare.
pub fn parse_ddl(sql: &str) -> Result<Vec<Table>, SchemaError> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut parser = Parser::new(sql, tokens);
    parser.parse()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.current().is_keyword(keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Bare word, compared case-insensitively. Used for words that are not
    /// worth a keyword of their own (`MATCH`, `DEFERRABLE`).
    fn at_word(&self, word: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(w) if w.eq_ignore_ascii_case(word))
    }

    fn malformed(&self, reason: impl Into<String>) -> SchemaError {
        let start = self.current().start;
        let statement: String = self.source[start..].chars().take(40).collect();
        SchemaError::Malformed {
            statement: if statement.is_empty() {
                "<end of input>".to_string()
            } else {
                statement
            },
            reason: reason.into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), SchemaError> {
        if self.at(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.malformed(format!("expected {what}")))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), SchemaError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            let word = format!("{keyword:?}").to_uppercase();
            Err(self.malformed(format!("expected {word}")))
        }
    }

    /// Identifier, or a non-structural keyword used as a name (`key`, `action`).
    fn expect_name(&mut self, what: &str) -> Result<String, SchemaError> {
        let token = self.current().clone();
        let name = match &token.kind {
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Keyword(
                Keyword::Key
                | Keyword::Action
                | Keyword::No
                | Keyword::Temp
                | Keyword::Conflict
                | Keyword::Asc
                | Keyword::Desc
                | Keyword::Delete
                | Keyword::Update
                | Keyword::Cascade
                | Keyword::Restrict
                | Keyword::Without,
            ) => self.source[token.start..token.end].to_string(),
            _ => return Err(self.malformed(format!("expected {what} name"))),
        };
        self.advance();

        // Schema-qualified name: keep the last part.
        if self.at(&TokenKind::Dot) {
            self.advance();
            return self.expect_name(what);
        }
        Ok(name)
    }

    /// `( name [ASC|DESC] [COLLATE x], ... )`
    fn parse_name_list(&mut self, what: &str) -> Result<Vec<String>, SchemaError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut names = Vec::new();
        loop {
            names.push(self.expect_name(what)?);
            if self.eat_keyword(Keyword::Collate) {
                self.expect_name("collation")?;
            }
            if !self.eat_keyword(Keyword::Asc) {
                self.eat_keyword(Keyword::Desc);
            }
            if self.at(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            self.expect(TokenKind::RParen, "',' or ')'")?;
            return Ok(names);
        }
    }

    /// Consumes a parenthesized expression and returns its inner text verbatim.
    fn parse_paren_expr(&mut self) -> Result<String, SchemaError> {
        if !self.at(&TokenKind::LParen) {
            return Err(self.malformed("expected '('"));
        }
        let open = self.current().end;
        let mut depth = 0usize;
        loop {
            match self.current().kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        let close = self.current().start;
                        self.advance();
                        return Ok(self.source[open..close].trim().to_string());
                    }
                }
                TokenKind::Eof => return Err(self.malformed("unbalanced parentheses")),
                _ => {}
            }
            self.advance();
        }
    }

    /// Skips `ON CONFLICT <resolution>`.
    fn skip_conflict_clause(&mut self) -> Result<(), SchemaError> {
        if self.at_keyword(Keyword::On) && self.peek_is_keyword(Keyword::Conflict) {
            self.advance();
            self.advance();
            self.expect_name("conflict resolution")?;
        }
        Ok(())
    }

    fn peek_is_keyword(&self, keyword: Keyword) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| t.is_keyword(keyword))
    }

    /// Skips to the end of the current statement.
    fn skip_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current().kind {
                TokenKind::Eof => return,
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Like [`Self::skip_statement`] but stops early at an unterminated
    /// `CREATE`.
    fn skip_to_next_statement(&mut self) {
        if !self.at_keyword(Keyword::Create) {
            self.skip_statement();
        }
    }

    fn skip_if_not_exists(&mut self) -> Result<(), SchemaError> {
        if self.eat_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Not)?;
            self.expect_keyword(Keyword::Exists)?;
        }
        Ok(())
    }

    fn parse(&mut self) -> Result<Vec<Table>, SchemaError> {
        let mut tables: Vec<Table> = Vec::new();
        let mut indexes: Vec<Index> = Vec::new();

        loop {
            match self.current().kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon => self.advance(),
                TokenKind::Keyword(Keyword::Create) => {
                    self.advance();
                    self.eat_keyword(Keyword::Temp);
                    if self.eat_keyword(Keyword::Table) {
                        let table = self.parse_create_table()?;
                        debug!(table = %table.name, columns = table.columns.len(), "Parsed table");
                        tables.push(table);
                    } else if self.at_keyword(Keyword::Unique) || self.at_keyword(Keyword::Index) {
                        indexes.push(self.parse_create_index()?);
                    } else {
                        debug!("Skipping unsupported CREATE statement");
                        self.skip_statement();
                    }
                }
                _ => self.skip_statement(),
            }
        }

        for index in indexes {
            let Some(table) = tables.iter_mut().find(|t| t.name == index.table) else {
                return Err(SchemaError::UnknownTable {
                    context: format!("index {}", index.name),
                    table: index.table,
                });
            };
            table.indexes.push(index);
        }

        Ok(tables)
    }

    fn parse_create_table(&mut self) -> Result<Table, SchemaError> {
        self.skip_if_not_exists()?;
        let mut table = Table::new(self.expect_name("table")?);
        self.expect(TokenKind::LParen, "'(' after table name")?;

        loop {
            if self.at_table_constraint() {
                self.parse_table_constraint(&mut table)?;
            } else {
                let (column, fk) = self.parse_column(&table.name)?;
                table.columns.push(column);
                table.foreign_keys.extend(fk);
            }

            if self.at(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            self.expect(TokenKind::RParen, "',' or ')' in table definition")?;
            break;
        }

        if self.at_keyword(Keyword::Without) {
            return Err(self.malformed("WITHOUT ROWID tables are not supported"));
        }
        // Trailing table options such as STRICT carry nothing for the model.
        self.skip_to_next_statement();

        Ok(table)
    }

    fn at_table_constraint(&self) -> bool {
        [
            Keyword::Constraint,
            Keyword::Primary,
            Keyword::Unique,
            Keyword::Check,
            Keyword::Foreign,
        ]
        .into_iter()
        .any(|k| self.at_keyword(k))
    }

    fn parse_column(&mut self, table: &str) -> Result<(Column, Option<ForeignKey>), SchemaError> {
        let name = self.expect_name("column")?;
        let declared = self.parse_type_name()?;
        let column_type =
            ColumnType::from_sql(&declared).ok_or_else(|| SchemaError::UnknownType {
                table: table.to_string(),
                column: name.clone(),
                declared: declared.clone(),
            })?;

        let mut column = Column::new(name, column_type);
        let mut fk = None;

        loop {
            match self.current().kind {
                TokenKind::Keyword(Keyword::Constraint) => {
                    self.advance();
                    self.expect_name("constraint")?;
                }
                TokenKind::Keyword(Keyword::Primary) => {
                    self.advance();
                    self.expect_keyword(Keyword::Key)?;
                    column.primary_key = true;
                    if !self.eat_keyword(Keyword::Asc) {
                        self.eat_keyword(Keyword::Desc);
                    }
                    self.skip_conflict_clause()?;
                    if self.eat_keyword(Keyword::Autoincrement) {
                        column.autoincrement = true;
                    }
                }
                TokenKind::Keyword(Keyword::Autoincrement) => {
                    self.advance();
                    column.autoincrement = true;
                }
                TokenKind::Keyword(Keyword::Not) => {
                    self.advance();
                    self.expect_keyword(Keyword::Null)?;
                    column.nullable = false;
                    self.skip_conflict_clause()?;
                }
                TokenKind::Keyword(Keyword::Null) => {
                    self.advance();
                    column.nullable = true;
                }
                TokenKind::Keyword(Keyword::Unique) => {
                    self.advance();
                    column.unique = true;
                    self.skip_conflict_clause()?;
                }
                TokenKind::Keyword(Keyword::Default) => {
                    self.advance();
                    column.default = Some(self.parse_default()?);
                }
                TokenKind::Keyword(Keyword::Check) => {
                    self.advance();
                    column.check = Some(self.parse_paren_expr()?);
                }
                TokenKind::Keyword(Keyword::Collate) => {
                    self.advance();
                    self.expect_name("collation")?;
                }
                TokenKind::Keyword(Keyword::References) => {
                    self.advance();
                    fk = Some(self.parse_references(table, vec![column.name.clone()])?);
                }
                _ => break,
            }
        }

        Ok((column, fk))
    }

    /// Type name: one or more words, optionally followed by size arguments.
    fn parse_type_name(&mut self) -> Result<String, SchemaError> {
        let start = self.current().start;
        let mut end = start;
        while let TokenKind::Ident(_) = self.current().kind {
            end = self.current().end;
            self.advance();
        }
        if end == start {
            return Ok(String::new());
        }
        if self.at(&TokenKind::LParen) {
            self.parse_paren_expr()?;
            end = self.tokens[self.pos - 1].end;
        }
        Ok(self.source[start..end].to_string())
    }

    fn parse_default(&mut self) -> Result<DefaultValue, SchemaError> {
        let token = self.current().clone();
        let value = match &token.kind {
            TokenKind::LParen => return Ok(DefaultValue::Expression(self.parse_paren_expr()?)),
            TokenKind::Symbol('+') => {
                self.advance();
                return self.parse_default();
            }
            TokenKind::Num(num) => {
                if num.contains('.') {
                    num.parse()
                        .map(DefaultValue::Real)
                        .map_err(|_| self.malformed("invalid numeric default"))?
                } else {
                    num.parse()
                        .map(DefaultValue::Integer)
                        .map_err(|_| self.malformed("invalid integer default"))?
                }
            }
            TokenKind::Str(s) => DefaultValue::Text(s.clone()),
            TokenKind::Ident(word) => DefaultValue::Text(word.clone()),
            TokenKind::Keyword(Keyword::Null) => DefaultValue::Null,
            TokenKind::Keyword(Keyword::True) => DefaultValue::Boolean(true),
            TokenKind::Keyword(Keyword::False) => DefaultValue::Boolean(false),
            TokenKind::Keyword(Keyword::CurrentTimestamp) => DefaultValue::CurrentTimestamp,
            TokenKind::Keyword(Keyword::CurrentDate) => DefaultValue::CurrentDate,
            TokenKind::Keyword(Keyword::CurrentTime) => DefaultValue::CurrentTime,
            _ => return Err(self.malformed("expected default value")),
        };
        self.advance();
        Ok(value)
    }

    /// Parses what follows `REFERENCES`.
    fn parse_references(
        &mut self,
        table: &str,
        columns: Vec<String>,
    ) -> Result<ForeignKey, SchemaError> {
        let referenced_table = self.expect_name("referenced table")?;
        let referenced_columns = if self.at(&TokenKind::LParen) {
            self.parse_name_list("referenced column")?
        } else {
            Vec::new()
        };

        let mut fk = ForeignKey {
            table: table.to_string(),
            columns,
            referenced_table,
            referenced_columns,
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        };

        loop {
            if self.at_keyword(Keyword::On) {
                self.advance();
                let on_delete = if self.eat_keyword(Keyword::Delete) {
                    true
                } else if self.eat_keyword(Keyword::Update) {
                    false
                } else {
                    return Err(self.malformed("expected DELETE or UPDATE after ON"));
                };
                let action = self.parse_action()?;
                if on_delete {
                    fk.on_delete = action;
                } else {
                    fk.on_update = action;
                }
            } else if self.at_word("MATCH") {
                self.advance();
                self.expect_name("match type")?;
            } else if self.at_word("DEFERRABLE")
                || (self.at_keyword(Keyword::Not) && self.peek_is_word("DEFERRABLE"))
            {
                self.eat_keyword(Keyword::Not);
                self.advance();
                if self.at_word("INITIALLY") {
                    self.advance();
                    self.expect_name("deferral mode")?;
                }
            } else {
                return Ok(fk);
            }
        }
    }

    fn peek_is_word(&self, word: &str) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| matches!(&t.kind, TokenKind::Ident(w) if w.eq_ignore_ascii_case(word)))
    }

    fn parse_action(&mut self) -> Result<ForeignKeyAction, SchemaError> {
        if self.eat_keyword(Keyword::Cascade) {
            Ok(ForeignKeyAction::Cascade)
        } else if self.eat_keyword(Keyword::Restrict) {
            Ok(ForeignKeyAction::Restrict)
        } else if self.eat_keyword(Keyword::Set) {
            if self.eat_keyword(Keyword::Null) {
                Ok(ForeignKeyAction::SetNull)
            } else if self.eat_keyword(Keyword::Default) {
                Ok(ForeignKeyAction::SetDefault)
            } else {
                Err(self.malformed("expected NULL or DEFAULT after SET"))
            }
        } else if self.eat_keyword(Keyword::No) {
            self.expect_keyword(Keyword::Action)?;
            Ok(ForeignKeyAction::NoAction)
        } else {
            Err(self.malformed("expected referential action"))
        }
    }

    fn parse_table_constraint(&mut self, table: &mut Table) -> Result<(), SchemaError> {
        if self.eat_keyword(Keyword::Constraint) {
            self.expect_name("constraint")?;
        }

        match self.current().kind {
            TokenKind::Keyword(Keyword::Primary) => {
                self.advance();
                self.expect_keyword(Keyword::Key)?;
                let columns = self.parse_name_list("primary key column")?;
                self.skip_conflict_clause()?;
                for name in columns {
                    let column = table
                        .columns
                        .iter_mut()
                        .find(|c| c.name == name)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            context: format!("primary key of {}", table.name),
                            table: table.name.clone(),
                            column: name.clone(),
                        })?;
                    column.primary_key = true;
                }
            }
            TokenKind::Keyword(Keyword::Unique) => {
                self.advance();
                let columns = self.parse_name_list("unique column")?;
                self.skip_conflict_clause()?;
                table.unique_constraints.push(columns);
            }
            TokenKind::Keyword(Keyword::Check) => {
                self.advance();
                let check = self.parse_paren_expr()?;
                table.checks.push(check);
            }
            TokenKind::Keyword(Keyword::Foreign) => {
                self.advance();
                self.expect_keyword(Keyword::Key)?;
                let columns = self.parse_name_list("foreign key column")?;
                self.expect_keyword(Keyword::References)?;
                let fk = self.parse_references(&table.name, columns)?;
                table.foreign_keys.push(fk);
            }
            _ => return Err(self.malformed("expected table constraint")),
        }
        Ok(())
    }

    fn parse_create_index(&mut self) -> Result<Index, SchemaError> {
        let unique = self.eat_keyword(Keyword::Unique);
        self.expect_keyword(Keyword::Index)?;
        self.skip_if_not_exists()?;
        let name = self.expect_name("index")?;
        self.expect_keyword(Keyword::On)?;
        let table = self.expect_name("table")?;
        let columns = self.parse_name_list("index column")?;
        // Partial-index WHERE clauses are not modelled.
        self.skip_to_next_statement();

        debug!(index = %name, table = %table, "Parsed index");
        Ok(Index {
            name,
            table,
            columns,
            unique,
        })
    }
}
