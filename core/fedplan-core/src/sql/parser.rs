use crate::command::PlanHints;
use crate::error::{PlanError, PlanResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// SQL 파서: sqlparser-rs
pub struct SqlParser {
    dialect: GenericDialect,
}

impl SqlParser {
    /// 새 SQL 파서 생성
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// SQL 문자열을 AST로 파싱
    pub fn parse(&self, sql: &str) -> PlanResult<Vec<Statement>> {
        Parser::parse_sql(&self.dialect, sql).map_err(|e| PlanError::SqlParse {
            message: e.to_string(),
            sql: sql.to_string(),
        })
    }

    /// Parse a single statement that may end in an `OPTION` hint clause.
    pub fn parse_with_hints(&self, sql: &str) -> PlanResult<(Statement, PlanHints)> {
        let (body, hints) = split_hints(sql)?;
        let mut statements = self.parse(body)?;
        if statements.len() != 1 {
            return Err(PlanError::SqlNotSupported {
                feature: format!("{} statements in one command", statements.len()),
                hint: "Plan one statement at a time".to_string(),
            });
        }
        Ok((statements.remove(0), hints))
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a trailing `OPTION MAKEDEP a, b MAKENOTDEP c` clause off the
/// statement text.
pub fn split_hints(sql: &str) -> PlanResult<(&str, PlanHints)> {
    let Some(start) = option_keyword(sql) else {
        return Ok((sql, PlanHints::default()));
    };
    let clause = &sql[start + "OPTION".len()..];
    let mut hints = PlanHints::default();
    let mut target: Option<&mut Vec<String>> = None;
    for word in clause
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|w| !w.is_empty())
    {
        if word.eq_ignore_ascii_case("MAKEDEP") {
            target = Some(&mut hints.make_dep);
        } else if word.eq_ignore_ascii_case("MAKENOTDEP") {
            target = Some(&mut hints.make_not_dep);
        } else if let Some(list) = target.as_deref_mut() {
            list.push(word.to_string());
        } else {
            return Err(PlanError::SqlParse {
                message: format!("unknown OPTION hint '{word}'"),
                sql: sql.to_string(),
            });
        }
    }
    Ok((sql[..start].trim_end(), hints))
}

/// Byte offset of the last standalone `OPTION` keyword outside string
/// literals.
fn option_keyword(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut in_quote = false;
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_quote = !in_quote;
        } else if !in_quote
            && (i == 0 || !is_word_byte(bytes[i - 1]))
            && bytes.len() - i >= 6
            && bytes[i..i + 6].eq_ignore_ascii_case(b"OPTION")
            && bytes.get(i + 6).is_none_or(|b| !is_word_byte(*b))
        {
            found = Some(i);
        }
        i += 1;
    }
    found
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}
