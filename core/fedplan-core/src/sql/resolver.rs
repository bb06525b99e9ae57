//! SQL 해석기: sqlparser AST → 해석된 Command
//!
//! Resolves names against [`QueryMetadata`]: groups (with aliases), columns
//! (with types), select-list output names and correlated references to
//! enclosing queries. Anything the command model cannot express is reported
//! as [`PlanError::SqlNotSupported`].

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::datatypes::DataType;
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Distinct, DuplicateTreatment, Expr as SqlExpr, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator,
    ObjectName, OrderByExpr as SqlOrderByExpr, Query as SqlQuery, Select, SelectItem, SetExpr,
    SetOperator as SqlSetOperator, SetQuantifier, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value,
};

use super::parser::SqlParser;
use crate::command::{
    Command, FromItem, JoinType, LimitClause, OrderByItem, PlanHints, Query, SelectColumn,
    SetOperator, SetQuery,
};
use crate::error::{PlanError, PlanResult};
use crate::expr::{
    AggregateFunction, BinaryOperator, ElementSymbol, Expr, GroupSymbol, ScalarValue, SubqueryKind,
};
use crate::metadata::{GroupRecord, QueryMetadata};

/// SQL BinaryOperator → BinaryOperator 변환
pub fn convert_binary_op(op: &SqlBinaryOp) -> PlanResult<BinaryOperator> {
    match op {
        SqlBinaryOp::Plus => Ok(BinaryOperator::Plus),
        SqlBinaryOp::Minus => Ok(BinaryOperator::Minus),
        SqlBinaryOp::Multiply => Ok(BinaryOperator::Multiply),
        SqlBinaryOp::Divide => Ok(BinaryOperator::Divide),
        SqlBinaryOp::Modulo => Ok(BinaryOperator::Modulo),
        SqlBinaryOp::Eq => Ok(BinaryOperator::Eq),
        SqlBinaryOp::NotEq => Ok(BinaryOperator::NotEq),
        SqlBinaryOp::Lt => Ok(BinaryOperator::Lt),
        SqlBinaryOp::LtEq => Ok(BinaryOperator::LtEq),
        SqlBinaryOp::Gt => Ok(BinaryOperator::Gt),
        SqlBinaryOp::GtEq => Ok(BinaryOperator::GtEq),
        SqlBinaryOp::And => Ok(BinaryOperator::And),
        SqlBinaryOp::Or => Ok(BinaryOperator::Or),
        _ => Err(PlanError::SqlNotSupported {
            feature: format!("binary operator {op}"),
            hint: "Use arithmetic, comparison, AND or OR".to_string(),
        }),
    }
}

/// Extract a non-negative integer from a LIMIT/OFFSET literal.
pub fn extract_u64(expr: &SqlExpr) -> PlanResult<u64> {
    match expr {
        SqlExpr::Value(Value::Number(n, _)) => n.parse::<u64>().map_err(|_| {
            PlanError::Resolve(format!(
                "LIMIT/OFFSET value must be a non-negative integer, got: {n}"
            ))
        }),
        _ => Err(PlanError::SqlNotSupported {
            feature: format!("non-literal LIMIT/OFFSET expression: {expr}"),
            hint: "Use an integer literal".to_string(),
        }),
    }
}

/// Return type of a scalar function call.
fn function_return_type(name: &str, args: &[Expr]) -> DataType {
    let first_known = || {
        args.iter()
            .map(Expr::data_type)
            .find(|dt| *dt != DataType::Null)
            .unwrap_or(DataType::Null)
    };
    match name {
        "UPPER" | "LOWER" | "CONCAT" | "SUBSTRING" | "SUBSTR" | "TRIM" => DataType::Utf8,
        "LENGTH" => DataType::Int32,
        _ => first_known(),
    }
}

fn number_literal(n: &str, negate: bool) -> PlanResult<ScalarValue> {
    let text = if negate { format!("-{n}") } else { n.to_string() };
    if let Ok(i) = text.parse::<i32>() {
        Ok(ScalarValue::Int32(i))
    } else if let Ok(i) = text.parse::<i64>() {
        Ok(ScalarValue::Int64(i))
    } else if let Ok(f) = text.parse::<f64>() {
        Ok(ScalarValue::Float64(f))
    } else {
        Err(PlanError::Resolve(format!("Invalid number: {n}")))
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Groups visible in one query block.
#[derive(Default)]
struct Scope {
    groups: Vec<(GroupSymbol, Arc<GroupRecord>)>,
}

impl Scope {
    fn add(&mut self, symbol: GroupSymbol, record: Arc<GroupRecord>) -> PlanResult<()> {
        if self
            .groups
            .iter()
            .any(|(g, _)| g.name.eq_ignore_ascii_case(&symbol.name))
        {
            return Err(PlanError::Resolve(format!(
                "group '{}' appears more than once in FROM; use an alias",
                symbol.name
            )));
        }
        self.groups.push((symbol, record));
        Ok(())
    }

    fn group(&self, qualifier: &str) -> Option<&(GroupSymbol, Arc<GroupRecord>)> {
        self.groups
            .iter()
            .find(|(g, _)| g.name.eq_ignore_ascii_case(qualifier))
    }

    fn column(&self, qualifier: Option<&str>, name: &str) -> PlanResult<Option<ElementSymbol>> {
        let mut found = None;
        for (group, record) in &self.groups {
            if qualifier.is_some_and(|q| !group.name.eq_ignore_ascii_case(q)) {
                continue;
            }
            if let Some(element) = record.element(name) {
                if found.is_some() {
                    return Err(PlanError::Resolve(format!("column '{name}' is ambiguous")));
                }
                found = Some(ElementSymbol::new(
                    group,
                    element.name.clone(),
                    element.data_type.clone(),
                ));
            }
        }
        Ok(found)
    }
}

/// Select items a `*` expands to for one group.
fn expand_group(group: &GroupSymbol, record: &GroupRecord) -> Vec<SelectColumn> {
    record
        .elements
        .iter()
        .map(|e| {
            SelectColumn::new(
                e.name.clone(),
                Expr::Column(ElementSymbol::new(group, e.name.clone(), e.data_type.clone())),
            )
        })
        .collect()
}

/// Where an expression appears; aggregates are legal only in some clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Select,
    Where,
    On,
    GroupBy,
    Having,
}

impl Clause {
    fn allows_aggregates(self) -> bool {
        matches!(self, Clause::Select | Clause::Having)
    }
}

/// 명령 해석기
pub struct CommandResolver<'a> {
    metadata: &'a dyn QueryMetadata,
    parser: SqlParser,
}

impl<'a> CommandResolver<'a> {
    pub fn new(metadata: &'a dyn QueryMetadata) -> Self {
        Self {
            metadata,
            parser: SqlParser::new(),
        }
    }

    /// Parse and resolve one query, including a trailing `OPTION` clause.
    pub fn resolve_sql(&self, sql: &str) -> PlanResult<Command> {
        let (statement, hints) = self.parser.parse_with_hints(sql)?;
        self.resolve_statement(&statement, hints)
    }

    pub fn resolve_statement(&self, statement: &Statement, hints: PlanHints) -> PlanResult<Command> {
        let Statement::Query(query) = statement else {
            return Err(PlanError::SqlNotSupported {
                feature: "Non-SELECT statements".to_string(),
                hint: "Only queries are planned".to_string(),
            });
        };
        let mut command = self.resolve_query(query, &[])?;
        attach_hints(&mut command, hints);
        Ok(command)
    }

    fn resolve_query(&self, query: &SqlQuery, outer: &[&Scope]) -> PlanResult<Command> {
        if query.with.is_some() {
            return Err(PlanError::SqlNotSupported {
                feature: "WITH clause".to_string(),
                hint: "Define a view instead".to_string(),
            });
        }
        let limit = self.resolve_limit(query)?;
        let order_by = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or_default();

        match query.body.as_ref() {
            SetExpr::Select(select) => {
                let (mut resolved, scope) = self.resolve_select(select, outer)?;
                let mut chain = outer.to_vec();
                chain.push(&scope);
                resolved.order_by = self.resolve_order_by(order_by, &resolved.select, Some(chain.as_slice()))?;
                resolved.limit = limit;
                Ok(Command::Query(Box::new(resolved)))
            }
            body => {
                let mut command = self.resolve_set_expr(body, outer)?;
                if order_by.is_empty() && limit.is_none() {
                    return Ok(command);
                }
                if let Command::Query(_) = command {
                    return Err(PlanError::SqlNotSupported {
                        feature: "ORDER BY / LIMIT on a parenthesized query".to_string(),
                        hint: "Move the clauses inside the parentheses".to_string(),
                    });
                }
                let outputs: Vec<SelectColumn> = command
                    .output_columns()
                    .into_iter()
                    .map(|s| SelectColumn::new(s.name.clone(), Expr::Column(s)))
                    .collect();
                let resolved_order = self.resolve_order_by(order_by, &outputs, None)?;
                if let Command::SetQuery(set) = &mut command {
                    set.order_by = resolved_order;
                    set.limit = limit;
                }
                Ok(command)
            }
        }
    }

    fn resolve_set_expr(&self, body: &SetExpr, outer: &[&Scope]) -> PlanResult<Command> {
        match body {
            SetExpr::Select(select) => {
                let (query, _) = self.resolve_select(select, outer)?;
                Ok(Command::Query(Box::new(query)))
            }
            SetExpr::Query(query) => self.resolve_query(query, outer),
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let op = match op {
                    SqlSetOperator::Union => SetOperator::Union,
                    SqlSetOperator::Except => SetOperator::Except,
                    SqlSetOperator::Intersect => SetOperator::Intersect,
                };
                let all = match set_quantifier {
                    SetQuantifier::All => true,
                    SetQuantifier::Distinct | SetQuantifier::None => false,
                    other => {
                        return Err(PlanError::SqlNotSupported {
                            feature: format!("set quantifier {other}"),
                            hint: "Use ALL or DISTINCT".to_string(),
                        });
                    }
                };
                let left = self.resolve_set_expr(left, outer)?;
                let right = self.resolve_set_expr(right, outer)?;
                let (l, r) = (left.output_columns(), right.output_columns());
                if l.len() != r.len() {
                    return Err(PlanError::Resolve(format!(
                        "{} branches project {} and {} columns",
                        op.sql(),
                        l.len(),
                        r.len()
                    )));
                }
                Ok(Command::SetQuery(Box::new(SetQuery {
                    op,
                    all,
                    left,
                    right,
                    order_by: vec![],
                    limit: None,
                })))
            }
            other => Err(PlanError::SqlNotSupported {
                feature: format!("query body: {other}"),
                hint: "Use SELECT or a set operation".to_string(),
            }),
        }
    }

    fn resolve_limit(&self, query: &SqlQuery) -> PlanResult<Option<LimitClause>> {
        let count = query.limit.as_ref().map(extract_u64).transpose()?;
        let offset = query
            .offset
            .as_ref()
            .map(|o| extract_u64(&o.value))
            .transpose()?
            .unwrap_or(0);
        Ok((count.is_some() || offset > 0).then_some(LimitClause { offset, count }))
    }

    fn resolve_select(&self, select: &Select, outer: &[&Scope]) -> PlanResult<(Query, Scope)> {
        let distinct = match &select.distinct {
            None => false,
            Some(Distinct::Distinct) => true,
            Some(Distinct::On(_)) => {
                return Err(PlanError::SqlNotSupported {
                    feature: "DISTINCT ON".to_string(),
                    hint: "Use DISTINCT or GROUP BY".to_string(),
                });
            }
        };

        let mut scope = Scope::default();
        let mut pending = Vec::new();
        for table in &select.from {
            pending.push(self.declare_from(table, &mut scope)?);
        }
        let mut chain = outer.to_vec();
        chain.push(&scope);

        let from = pending
            .into_iter()
            .map(|item| self.resolve_from(item, &chain))
            .collect::<PlanResult<Vec<_>>>()?;

        let mut select_columns = Vec::new();
        let mut used = BTreeSet::new();
        for (position, item) in select.projection.iter().enumerate() {
            let columns = match item {
                SelectItem::Wildcard(_) => scope
                    .groups
                    .iter()
                    .flat_map(|(g, r)| expand_group(g, r))
                    .collect(),
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = object_name(name);
                    let (group, record) = scope.group(&qualifier).ok_or_else(|| {
                        PlanError::Resolve(format!("group '{qualifier}' not found in FROM"))
                    })?;
                    expand_group(group, record)
                }
                SelectItem::UnnamedExpr(expr) => {
                    let resolved = self.resolve_expr(expr, &chain, Clause::Select)?;
                    let name = match expr {
                        SqlExpr::Identifier(ident) => ident.value.clone(),
                        SqlExpr::CompoundIdentifier(idents) => idents
                            .last()
                            .map(|i| i.value.clone())
                            .unwrap_or_default(),
                        _ => match &resolved {
                            Expr::Column(symbol) => symbol.name.clone(),
                            _ => format!("expr{}", position + 1),
                        },
                    };
                    vec![SelectColumn::new(name, resolved)]
                }
                SelectItem::ExprWithAlias { expr, alias } => vec![SelectColumn::new(
                    alias.value.clone(),
                    self.resolve_expr(expr, &chain, Clause::Select)?,
                )],
            };
            for column in columns {
                let name = unique_name(&mut used, &column.name);
                select_columns.push(SelectColumn::new(name, column.expr));
            }
        }
        if select_columns.is_empty() {
            return Err(PlanError::Resolve("empty select list".to_string()));
        }

        let criteria = select
            .selection
            .as_ref()
            .map(|e| self.resolve_expr(e, &chain, Clause::Where))
            .transpose()?;
        let group_by = match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => exprs
                .iter()
                .map(|e| self.resolve_expr(e, &chain, Clause::GroupBy))
                .collect::<PlanResult<Vec<_>>>()?,
            other => {
                return Err(PlanError::SqlNotSupported {
                    feature: format!("{other}"),
                    hint: "List the grouping expressions".to_string(),
                });
            }
        };
        let having = select
            .having
            .as_ref()
            .map(|e| self.resolve_expr(e, &chain, Clause::Having))
            .transpose()?;

        let query = Query {
            select: select_columns,
            distinct,
            from,
            criteria,
            group_by,
            having,
            order_by: vec![],
            limit: None,
            hints: PlanHints::default(),
        };
        Ok((query, scope))
    }

    /// Register the groups of a FROM item; join criteria are resolved once
    /// the whole FROM clause is in scope.
    fn declare_from<'t>(&self, table: &'t TableWithJoins, scope: &mut Scope) -> PlanResult<PendingFrom<'t>> {
        let mut item = PendingFrom::Group(self.declare_group(&table.relation, scope)?);
        for join in &table.joins {
            let right = PendingFrom::Group(self.declare_group(&join.relation, scope)?);
            let (join_type, constraint) = match &join.join_operator {
                JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
                JoinOperator::LeftOuter(c) => (JoinType::LeftOuter, Some(c)),
                JoinOperator::RightOuter(c) => (JoinType::RightOuter, Some(c)),
                JoinOperator::FullOuter(c) => (JoinType::FullOuter, Some(c)),
                JoinOperator::CrossJoin => (JoinType::Cross, None),
                other => {
                    return Err(PlanError::SqlNotSupported {
                        feature: format!("JOIN type: {other:?}"),
                        hint: "Supported: INNER, LEFT, RIGHT, FULL, CROSS JOIN".to_string(),
                    });
                }
            };
            let on = match constraint {
                None => None,
                Some(JoinConstraint::On(expr)) => Some(expr),
                Some(JoinConstraint::Using(_)) => {
                    return Err(PlanError::SqlNotSupported {
                        feature: "JOIN USING clause".to_string(),
                        hint: "Use ON clause instead (e.g., ON a.id = b.id)".to_string(),
                    });
                }
                Some(JoinConstraint::Natural) => {
                    return Err(PlanError::SqlNotSupported {
                        feature: "NATURAL JOIN".to_string(),
                        hint: "Use explicit ON clause instead".to_string(),
                    });
                }
                Some(JoinConstraint::None) => None,
            };
            if on.is_none() && join_type != JoinType::Cross && join_type != JoinType::Inner {
                return Err(PlanError::Resolve(format!("{join_type} JOIN requires ON condition")));
            }
            item = PendingFrom::Join {
                left: Box::new(item),
                right: Box::new(right),
                join_type,
                on,
            };
        }
        Ok(item)
    }

    fn declare_group(&self, factor: &TableFactor, scope: &mut Scope) -> PlanResult<GroupSymbol> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return Err(PlanError::SqlNotSupported {
                feature: "Complex table expressions".to_string(),
                hint: "Use group names; define a view for derived tables".to_string(),
            });
        };
        let record = self.metadata.group(&object_name(name))?;
        let symbol = match alias {
            Some(alias) => GroupSymbol::aliased(alias.name.value.clone(), record.name.clone()),
            None => GroupSymbol::new(record.name.clone()),
        };
        scope.add(symbol.clone(), record)?;
        Ok(symbol)
    }

    fn resolve_from(&self, item: PendingFrom<'_>, chain: &[&Scope]) -> PlanResult<FromItem> {
        match item {
            PendingFrom::Group(group) => Ok(FromItem::Group(group)),
            PendingFrom::Join {
                left,
                right,
                join_type,
                on,
            } => {
                let criteria = match on {
                    Some(expr) => vec![self.resolve_expr(expr, chain, Clause::On)?],
                    None => vec![],
                };
                let join_type = if join_type == JoinType::Inner && criteria.is_empty() {
                    JoinType::Cross
                } else {
                    join_type
                };
                Ok(FromItem::Join {
                    left: Box::new(self.resolve_from(*left, chain)?),
                    right: Box::new(self.resolve_from(*right, chain)?),
                    join_type,
                    criteria,
                })
            }
        }
    }

    /// ORDER BY items name select-list outputs: by alias, by position, or
    /// by repeating a selected expression.
    fn resolve_order_by(
        &self,
        items: &[SqlOrderByExpr],
        outputs: &[SelectColumn],
        chain: Option<&[&Scope]>,
    ) -> PlanResult<Vec<OrderByItem>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let ascending = item.asc.unwrap_or(true);
            let by_name = match &item.expr {
                SqlExpr::Identifier(ident) => outputs
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&ident.value)),
                SqlExpr::Value(Value::Number(n, _)) => {
                    let position = n.parse::<usize>().ok().filter(|p| *p >= 1 && *p <= outputs.len());
                    let Some(position) = position else {
                        return Err(PlanError::Resolve(format!("ORDER BY position {n} is out of range")));
                    };
                    Some(&outputs[position - 1])
                }
                _ => None,
            };
            let column = match (by_name, chain) {
                (Some(column), _) => column,
                (None, Some(chain)) => {
                    let resolved = self.resolve_expr(&item.expr, chain, Clause::Select)?;
                    outputs.iter().find(|c| c.expr == resolved).ok_or_else(|| {
                        PlanError::SqlNotSupported {
                            feature: format!("ORDER BY on unselected expression {}", item.expr),
                            hint: "Add the expression to the select list".to_string(),
                        }
                    })?
                }
                (None, None) => {
                    return Err(PlanError::Resolve(format!(
                        "ORDER BY item {} does not name an output column",
                        item.expr
                    )));
                }
            };
            out.push(OrderByItem {
                expr: Expr::Column(column.symbol()),
                ascending,
            });
        }
        Ok(out)
    }

    fn resolve_column(&self, parts: &[Ident], chain: &[&Scope]) -> PlanResult<Expr> {
        let Some((column, qualifier)) = parts.split_last() else {
            return Err(PlanError::Resolve("empty identifier".to_string()));
        };
        let qualifier = (!qualifier.is_empty()).then(|| {
            qualifier
                .iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join(".")
        });
        for (depth, scope) in chain.iter().rev().enumerate() {
            if let Some(symbol) = scope.column(qualifier.as_deref(), &column.value)? {
                return Ok(if depth == 0 {
                    Expr::Column(symbol)
                } else {
                    Expr::OuterRef(symbol)
                });
            }
            // a qualified name stops at the scope declaring the qualifier
            if qualifier.as_deref().is_some_and(|q| scope.group(q).is_some()) {
                break;
            }
        }
        let full = parts.iter().map(|i| i.value.as_str()).collect::<Vec<_>>().join(".");
        Err(PlanError::Resolve(format!("column '{full}' not found")))
    }

    fn resolve_subquery(&self, query: &SqlQuery, chain: &[&Scope]) -> PlanResult<Arc<Command>> {
        Ok(Arc::new(self.resolve_query(query, chain)?))
    }

    fn single_column_type(command: &Command) -> PlanResult<DataType> {
        match command.output_columns().as_slice() {
            [column] => Ok(column.data_type.clone()),
            columns => Err(PlanError::Resolve(format!(
                "subquery must project one column, found {}",
                columns.len()
            ))),
        }
    }

    /// SQL Expr → Expr 변환
    fn resolve_expr(&self, expr: &SqlExpr, chain: &[&Scope], clause: Clause) -> PlanResult<Expr> {
        let resolve = |e: &SqlExpr| self.resolve_expr(e, chain, clause);
        match expr {
            SqlExpr::Identifier(ident) => self.resolve_column(std::slice::from_ref(ident), chain),
            SqlExpr::CompoundIdentifier(idents) => self.resolve_column(idents, chain),
            SqlExpr::Value(value) => {
                let scalar = match value {
                    Value::Number(n, _) => number_literal(n, false)?,
                    Value::SingleQuotedString(s) => ScalarValue::Utf8(s.clone()),
                    Value::Boolean(b) => ScalarValue::Boolean(*b),
                    Value::Null => ScalarValue::Null,
                    other => {
                        return Err(PlanError::SqlNotSupported {
                            feature: format!("literal {other}"),
                            hint: "Use numbers, quoted strings, booleans or NULL".to_string(),
                        });
                    }
                };
                Ok(Expr::Literal(scalar))
            }
            SqlExpr::BinaryOp { left, op, right } => {
                let op = convert_binary_op(op)?;
                Ok(Expr::binary(resolve(left)?, op, resolve(right)?))
            }
            SqlExpr::UnaryOp { op, expr: inner } => match (op, inner.as_ref()) {
                (UnaryOperator::Not, _) => Ok(Expr::Not(Arc::new(resolve(inner)?))),
                (UnaryOperator::Plus, _) => resolve(inner),
                (UnaryOperator::Minus, SqlExpr::Value(Value::Number(n, _))) => {
                    Ok(Expr::Literal(number_literal(n, true)?))
                }
                (UnaryOperator::Minus, _) => Ok(Expr::binary(
                    Expr::Literal(ScalarValue::Int32(0)),
                    BinaryOperator::Minus,
                    resolve(inner)?,
                )),
                (other, _) => Err(PlanError::SqlNotSupported {
                    feature: format!("unary operator {other}"),
                    hint: "Use NOT or arithmetic negation".to_string(),
                }),
            },
            SqlExpr::Nested(inner) => resolve(inner),
            SqlExpr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Arc::new(resolve(inner)?),
                negated: false,
            }),
            SqlExpr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Arc::new(resolve(inner)?),
                negated: true,
            }),
            SqlExpr::InList {
                expr: inner,
                list,
                negated,
            } => Ok(Expr::InList {
                expr: Arc::new(resolve(inner)?),
                list: list.iter().map(resolve).collect::<PlanResult<Vec<_>>>()?,
                negated: *negated,
            }),
            SqlExpr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let value = resolve(inner)?;
                let range = Expr::and(
                    Expr::binary(value.clone(), BinaryOperator::GtEq, resolve(low)?),
                    Expr::binary(value, BinaryOperator::LtEq, resolve(high)?),
                );
                Ok(if *negated {
                    Expr::Not(Arc::new(range))
                } else {
                    range
                })
            }
            SqlExpr::InSubquery {
                expr: inner,
                subquery,
                negated,
            } => {
                let value = resolve(inner)?;
                let command = self.resolve_subquery(subquery, chain)?;
                Self::single_column_type(&command)?;
                Ok(Expr::Subquery {
                    kind: SubqueryKind::In {
                        expr: Arc::new(value),
                        negated: *negated,
                    },
                    command,
                })
            }
            SqlExpr::Exists { subquery, negated } => Ok(Expr::Subquery {
                kind: SubqueryKind::Exists { negated: *negated },
                command: self.resolve_subquery(subquery, chain)?,
            }),
            SqlExpr::Subquery(subquery) => {
                let command = self.resolve_subquery(subquery, chain)?;
                let data_type = Self::single_column_type(&command)?;
                Ok(Expr::Subquery {
                    kind: SubqueryKind::Scalar(data_type),
                    command,
                })
            }
            SqlExpr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let branches = conditions
                    .iter()
                    .zip(results)
                    .map(|(when, then)| Ok((resolve(when)?, resolve(then)?)))
                    .collect::<PlanResult<Vec<_>>>()?;
                Ok(Expr::Case {
                    operand: operand.as_deref().map(resolve).transpose()?.map(Arc::new),
                    branches,
                    else_expr: else_result.as_deref().map(resolve).transpose()?.map(Arc::new),
                })
            }
            SqlExpr::Function(func) => {
                let name = object_name(&func.name).to_ascii_uppercase();
                let (args, distinct, star) = match &func.args {
                    FunctionArguments::None => (vec![], false, false),
                    FunctionArguments::List(list) => {
                        let mut args = Vec::with_capacity(list.args.len());
                        let mut star = false;
                        for arg in &list.args {
                            match arg {
                                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => args.push(e),
                                FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => star = true,
                                other => {
                                    return Err(PlanError::SqlNotSupported {
                                        feature: format!("function argument {other}"),
                                        hint: "Pass positional arguments".to_string(),
                                    });
                                }
                            }
                        }
                        let distinct = matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
                        (args, distinct, star)
                    }
                    FunctionArguments::Subquery(_) => {
                        return Err(PlanError::SqlNotSupported {
                            feature: "Subquery function arguments".to_string(),
                            hint: "Use a scalar subquery expression".to_string(),
                        });
                    }
                };
                if func.over.is_some() {
                    return Err(PlanError::SqlNotSupported {
                        feature: "window functions".to_string(),
                        hint: "Aggregate with GROUP BY".to_string(),
                    });
                }

                if let Some(aggregate) = AggregateFunction::from_name(&name) {
                    if !clause.allows_aggregates() {
                        return Err(PlanError::Resolve(format!(
                            "aggregate {name} is not allowed in {clause:?}"
                        )));
                    }
                    let arg = match (args.as_slice(), star, aggregate) {
                        ([], true, AggregateFunction::Count) => None,
                        ([arg], false, _) => {
                            let resolved = self.resolve_expr(arg, chain, Clause::Where)?;
                            Some(resolved)
                        }
                        _ => {
                            return Err(PlanError::Resolve(format!(
                                "{name} takes exactly one argument"
                            )));
                        }
                    };
                    return Ok(Expr::aggregate(aggregate, arg, distinct));
                }
                if star {
                    return Err(PlanError::Resolve(format!("{name}(*) is not a valid call")));
                }
                let args = args.into_iter().map(resolve).collect::<PlanResult<Vec<_>>>()?;
                let return_type = function_return_type(&name, &args);
                Ok(Expr::function(name, args, return_type))
            }
            other => Err(PlanError::SqlNotSupported {
                feature: format!("expression: {other}"),
                hint: "Rewrite with supported operators and functions".to_string(),
            }),
        }
    }
}

/// FROM item whose join criteria are not resolved yet.
enum PendingFrom<'t> {
    Group(GroupSymbol),
    Join {
        left: Box<PendingFrom<'t>>,
        right: Box<PendingFrom<'t>>,
        join_type: JoinType,
        on: Option<&'t SqlExpr>,
    },
}

fn unique_name(used: &mut BTreeSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while !used.insert(candidate.to_ascii_lowercase()) {
        candidate = format!("{name}_{n}");
        n += 1;
    }
    candidate
}

fn attach_hints(command: &mut Command, hints: PlanHints) {
    match command {
        Command::Query(query) => query.hints = hints,
        Command::SetQuery(set) => attach_hints(&mut set.left, hints),
    }
}
