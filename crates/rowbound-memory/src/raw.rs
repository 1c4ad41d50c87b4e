//! A small statement parser for caller-supplied SQL.
//!
//! Understands the forms callers actually send through raw execution:
//!
//! ```text
//! UPDATE t SET a = ?, b = 'x' [WHERE c = ? AND d IS NULL]
//! DELETE FROM t [WHERE c = ?]
//! INSERT INTO t (a, b) VALUES (?, ?)
//! ```
//!
//! Placeholders may be `?`, `?N` or `$N`. Anything else is rejected as
//! unsupported rather than guessed at.

use rowbound_core::{Error, QueryError, QueryErrorKind, Result, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawStatement {
    Update {
        table: String,
        set: Vec<(String, Value)>,
        filter: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        filter: Vec<(String, Value)>,
    },
    Insert {
        table: String,
        values: Vec<(String, Value)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Str(String),
    Num(String),
    Placeholder(Option<usize>),
    Sym(char),
}

pub(crate) fn parse(sql: &str, params: &[Value]) -> Result<RawStatement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser {
        sql,
        tokens,
        pos: 0,
        params,
        next_param: 0,
    };
    let statement = parser.statement()?;
    parser.eat_sym(';');
    if parser.pos < parser.tokens.len() {
        return Err(parser.error(QueryErrorKind::Syntax, "unexpected trailing input"));
    }
    Ok(statement)
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '\'' => {
                let (text, next) = quoted(&chars, i, '\'', sql)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            '"' | '`' => {
                let (text, next) = quoted(&chars, i, c, sql)?;
                tokens.push(Token::Quoted(text));
                i = next;
            }
            '?' | '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let index = if end > start {
                    let digits: String = chars[start..end].iter().collect();
                    digits.parse().ok()
                } else if c == '$' {
                    return Err(syntax(sql, "`$` must be followed by a parameter number"));
                } else {
                    None
                };
                tokens.push(Token::Placeholder(index));
                i = end;
            }
            ',' | '=' | '(' | ')' | ';' => {
                tokens.push(Token::Sym(c));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(sql, &format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

fn quoted(chars: &[char], start: usize, quote: char, sql: &str) -> Result<(String, usize)> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                text.push(quote);
                i += 2;
                continue;
            }
            return Ok((text, i + 1));
        }
        text.push(chars[i]);
        i += 1;
    }
    Err(syntax(sql, "unterminated quoted text"))
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    params: &'a [Value],
    next_param: usize,
}

impl Parser<'_> {
    fn statement(&mut self) -> Result<RawStatement> {
        if self.eat_keyword("UPDATE") {
            let table = self.identifier()?;
            self.expect_keyword("SET")?;
            let mut set = vec![self.assignment()?];
            while self.eat_sym(',') {
                set.push(self.assignment()?);
            }
            let filter = self.where_clause()?;
            Ok(RawStatement::Update { table, set, filter })
        } else if self.eat_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.identifier()?;
            let filter = self.where_clause()?;
            Ok(RawStatement::Delete { table, filter })
        } else if self.eat_keyword("INSERT") {
            self.expect_keyword("INTO")?;
            let table = self.identifier()?;
            let columns = self.list(Self::identifier)?;
            self.expect_keyword("VALUES")?;
            let values = self.list(Self::value)?;
            if columns.len() != values.len() {
                return Err(self.error(
                    QueryErrorKind::Syntax,
                    "column and value counts differ",
                ));
            }
            Ok(RawStatement::Insert {
                table,
                values: columns.into_iter().zip(values).collect(),
            })
        } else {
            Err(self.error(
                QueryErrorKind::Unsupported,
                "only UPDATE, DELETE and INSERT statements can be executed",
            ))
        }
    }

    fn assignment(&mut self) -> Result<(String, Value)> {
        let column = self.identifier()?;
        self.expect_sym('=')?;
        Ok((column, self.value()?))
    }

    fn where_clause(&mut self) -> Result<Vec<(String, Value)>> {
        let mut filter = Vec::new();
        if !self.eat_keyword("WHERE") {
            return Ok(filter);
        }
        loop {
            let column = self.identifier()?;
            if self.eat_keyword("IS") {
                self.expect_keyword("NULL")?;
                filter.push((column, Value::Null));
            } else {
                self.expect_sym('=')?;
                let value = self.value()?;
                filter.push((column, value));
            }
            if !self.eat_keyword("AND") {
                return Ok(filter);
            }
        }
    }

    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect_sym('(')?;
        let mut items = vec![item(self)?];
        while self.eat_sym(',') {
            items.push(item(self)?);
        }
        self.expect_sym(')')?;
        Ok(items)
    }

    fn identifier(&mut self) -> Result<String> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Word(word) | Token::Quoted(word)) => {
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.error(QueryErrorKind::Syntax, "expected identifier")),
        }
    }

    fn value(&mut self) -> Result<Value> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Placeholder(index)) => {
                let slot = match index {
                    Some(n) if n >= 1 => n - 1,
                    Some(_) => return Err(self.error(QueryErrorKind::Syntax, "parameters are numbered from 1")),
                    None => {
                        self.next_param += 1;
                        self.next_param - 1
                    }
                };
                self.params
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| self.error(QueryErrorKind::Syntax, "missing parameter value"))
            }
            Some(Token::Str(text)) => Ok(Value::Text(text)),
            Some(Token::Num(digits)) => {
                if let Ok(int) = digits.parse::<i64>() {
                    Ok(Value::BigInt(int))
                } else {
                    digits
                        .parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| self.error(QueryErrorKind::Syntax, "malformed number"))
                }
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("TRUE") => Ok(Value::Bool(true)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("FALSE") => Ok(Value::Bool(false)),
            _ => Err(self.error(QueryErrorKind::Syntax, "expected a value")),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(QueryErrorKind::Syntax, &format!("expected {keyword}")))
        }
    }

    fn eat_sym(&mut self, sym: char) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: char) -> Result<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.error(QueryErrorKind::Syntax, &format!("expected `{sym}`")))
        }
    }

    fn error(&self, kind: QueryErrorKind, message: &str) -> Error {
        Error::Query(QueryError {
            kind,
            sql: Some(self.sql.to_string()),
            message: message.to_string(),
            source: None,
        })
    }
}

fn syntax(sql: &str, message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: message.to_string(),
        source: None,
    })
}
