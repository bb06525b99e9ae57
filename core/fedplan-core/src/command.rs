//! Resolved command tree
//!
//! Input of the planner: a query that has already been parsed, resolved
//! against metadata and rewritten. Every column is an [`ElementSymbol`] with
//! its type, every group a [`GroupSymbol`] with its metadata id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::expr::{ElementSymbol, Expr, GroupSymbol, SubqueryKind};

/// JOIN 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(self, Self::LeftOuter | Self::RightOuter | Self::FullOuter)
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
            Self::RightOuter => "RIGHT OUTER JOIN",
            Self::FullOuter => "FULL OUTER JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inner => "INNER",
            Self::LeftOuter => "LEFT OUTER",
            Self::RightOuter => "RIGHT OUTER",
            Self::FullOuter => "FULL OUTER",
            Self::Cross => "CROSS",
        };
        f.write_str(name)
    }
}

/// 집합 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetOperator {
    Union,
    Except,
    Intersect,
}

impl SetOperator {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Except => "EXCEPT",
            Self::Intersect => "INTERSECT",
        }
    }
}

/// Named item of a select list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectColumn {
    pub name: String,
    pub expr: Expr,
}

impl SelectColumn {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    /// Derived symbol under which the column is visible above the projection.
    pub fn symbol(&self) -> ElementSymbol {
        ElementSymbol::derived(self.name.clone(), self.expr.data_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FromItem {
    Group(GroupSymbol),
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        join_type: JoinType,
        criteria: Vec<Expr>,
    },
}

impl FromItem {
    pub fn groups(&self) -> Vec<GroupSymbol> {
        match self {
            FromItem::Group(group) => vec![group.clone()],
            FromItem::Join { left, right, .. } => {
                let mut out = left.groups();
                out.extend(right.groups());
                out
            }
        }
    }

    fn exprs(&self) -> Vec<&Expr> {
        match self {
            FromItem::Group(_) => vec![],
            FromItem::Join {
                left,
                right,
                criteria,
                ..
            } => {
                let mut out = left.exprs();
                out.extend(right.exprs());
                out.extend(criteria.iter());
                out
            }
        }
    }

    fn map_exprs(&self, f: &mut impl FnMut(&Expr) -> Expr) -> FromItem {
        match self {
            FromItem::Group(group) => FromItem::Group(group.clone()),
            FromItem::Join {
                left,
                right,
                join_type,
                criteria,
            } => FromItem::Join {
                left: Box::new(left.map_exprs(f)),
                right: Box::new(right.map_exprs(f)),
                join_type: *join_type,
                criteria: criteria.iter().map(|e| f(e)).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// LIMIT / OFFSET window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitClause {
    pub offset: u64,
    pub count: Option<u64>,
}

/// Planner hints (`OPTION MAKEDEP g` and friends).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PlanHints {
    pub make_dep: Vec<String>,
    pub make_not_dep: Vec<String>,
}

impl PlanHints {
    pub fn is_empty(&self) -> bool {
        self.make_dep.is_empty() && self.make_not_dep.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub select: Vec<SelectColumn>,
    pub distinct: bool,
    pub from: Vec<FromItem>,
    pub criteria: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<LimitClause>,
    pub hints: PlanHints,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetQuery {
    pub op: SetOperator,
    pub all: bool,
    pub left: Command,
    pub right: Command,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<LimitClause>,
}

/// 해석이 끝난 명령
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Query(Box<Query>),
    SetQuery(Box<SetQuery>),
}

impl Command {
    /// Derived output symbols, in select-list order.
    pub fn output_columns(&self) -> Vec<ElementSymbol> {
        match self {
            Command::Query(query) => query.select.iter().map(SelectColumn::symbol).collect(),
            Command::SetQuery(set) => set.left.output_columns(),
        }
    }

    /// Groups in this command's own FROM clauses (both branches of a set query).
    pub fn groups(&self) -> Vec<GroupSymbol> {
        match self {
            Command::Query(query) => query.from.iter().flat_map(FromItem::groups).collect(),
            Command::SetQuery(set) => {
                let mut out = set.left.groups();
                out.extend(set.right.groups());
                out
            }
        }
    }

    /// Groups of this command and of every nested subquery.
    pub fn all_groups(&self) -> Vec<GroupSymbol> {
        let mut out = self.groups();
        for expr in self.exprs() {
            for sub in expr.subqueries() {
                out.extend(sub.all_groups());
            }
        }
        out
    }

    pub fn hints(&self) -> PlanHints {
        match self {
            Command::Query(query) => query.hints.clone(),
            Command::SetQuery(set) => {
                let mut hints = set.left.hints();
                let right = set.right.hints();
                hints.make_dep.extend(right.make_dep);
                hints.make_not_dep.extend(right.make_not_dep);
                hints
            }
        }
    }

    /// Every expression at this scope (set query branches included).
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Command::Query(query) => {
                let mut out: Vec<&Expr> = query.select.iter().map(|c| &c.expr).collect();
                for item in &query.from {
                    out.extend(item.exprs());
                }
                out.extend(query.criteria.iter());
                out.extend(query.group_by.iter());
                out.extend(query.having.iter());
                out.extend(query.order_by.iter().map(|o| &o.expr));
                out
            }
            Command::SetQuery(set) => {
                let mut out = set.left.exprs();
                out.extend(set.right.exprs());
                out.extend(set.order_by.iter().map(|o| &o.expr));
                out
            }
        }
    }

    /// Correlated references made by this command (or its nested
    /// subqueries) to groups outside of it.
    pub fn outer_refs(&self) -> BTreeSet<ElementSymbol> {
        let own: BTreeSet<String> = self.groups().into_iter().map(|g| g.name).collect();
        let mut out = BTreeSet::new();
        for expr in self.exprs() {
            expr.walk(&mut |e| {
                match e {
                    Expr::OuterRef(symbol) => {
                        out.insert(symbol.clone());
                    }
                    Expr::Subquery { command, .. } => {
                        out.extend(command.outer_refs());
                    }
                    _ => {}
                }
                true
            });
        }
        out.retain(|symbol| {
            symbol
                .group
                .as_ref()
                .is_none_or(|group| !own.contains(group))
        });
        out
    }

    pub fn is_correlated(&self) -> bool {
        !self.outer_refs().is_empty()
    }

    /// Rebuild the command with every top-level expression mapped.
    pub fn map_exprs(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Command {
        match self {
            Command::Query(query) => Command::Query(Box::new(Query {
                select: query
                    .select
                    .iter()
                    .map(|c| SelectColumn::new(c.name.clone(), f(&c.expr)))
                    .collect(),
                distinct: query.distinct,
                from: query.from.iter().map(|item| item.map_exprs(f)).collect(),
                criteria: query.criteria.as_ref().map(|e| f(e)),
                group_by: query.group_by.iter().map(|e| f(e)).collect(),
                having: query.having.as_ref().map(|e| f(e)),
                order_by: query
                    .order_by
                    .iter()
                    .map(|o| OrderByItem {
                        expr: f(&o.expr),
                        ascending: o.ascending,
                    })
                    .collect(),
                limit: query.limit,
                hints: query.hints.clone(),
            })),
            Command::SetQuery(set) => Command::SetQuery(Box::new(SetQuery {
                op: set.op,
                all: set.all,
                left: set.left.map_exprs(f),
                right: set.right.map_exprs(f),
                order_by: set
                    .order_by
                    .iter()
                    .map(|o| OrderByItem {
                        expr: f(&o.expr),
                        ascending: o.ascending,
                    })
                    .collect(),
                limit: set.limit,
            })),
        }
    }

    /// Rename the groups that correlated references point at.
    pub fn rename_outer_refs(&self, renames: &BTreeMap<String, String>) -> Command {
        let own: BTreeSet<String> = self.groups().into_iter().map(|g| g.name).collect();
        let renames: BTreeMap<String, String> = renames
            .iter()
            .filter(|(from, _)| !own.contains(*from))
            .map(|(a, b)| (a.clone(), b.clone()))
            .collect();
        if renames.is_empty() {
            return self.clone();
        }
        self.map_exprs(&mut |expr| rename_refs(expr, &renames))
    }
}

fn rename_refs(expr: &Expr, renames: &BTreeMap<String, String>) -> Expr {
    expr.transform(&mut |e| match e {
        Expr::OuterRef(symbol) => {
            let group = symbol.group.as_ref()?;
            renames
                .get(group)
                .map(|new| Expr::OuterRef(symbol.regrouped(new)))
        }
        Expr::Subquery { kind, command } => {
            let kind = match kind {
                SubqueryKind::In { expr, negated } => SubqueryKind::In {
                    expr: Arc::new(rename_refs(expr, renames)),
                    negated: *negated,
                },
                other => other.clone(),
            };
            Some(Expr::Subquery {
                kind,
                command: Arc::new(command.rename_outer_refs(renames)),
            })
        }
        _ => None,
    })
}
