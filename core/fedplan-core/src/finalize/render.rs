//! SQL rendering of Access subtrees.
//!
//! Every group occurrence gets an alias `g_n` in pre-order of the subtree,
//! every inline view `v_n`, every select item `c_n`. Groups referenced by
//! pushed subqueries are numbered after the plan's own groups.

use std::collections::BTreeMap;

use super::dependent::{AtomicCommand, CommandSegment};
use crate::capabilities::{Capability, CapabilityOracle};
use crate::command::{Command, FromItem, JoinType, Query, SelectColumn, SetOperator};
use crate::error::{PlanError, PlanResult};
use crate::expr::{ElementSymbol, Expr, SubqueryKind, conjoin};
use crate::plan::{NodeId, NodeProps, PlanTree, SortItem, combine_limit_windows};

/// Render the subtree of `access` into one atomic command.
pub(crate) fn render_access(
    tree: &PlanTree,
    oracle: &CapabilityOracle,
    access: NodeId,
) -> PlanResult<AtomicCommand> {
    let NodeProps::Access { model } = tree.props(access)? else {
        return Err(PlanError::InvalidTree(format!("node {access} is not an Access node")));
    };
    let top = tree
        .first_child(access)
        .ok_or_else(|| PlanError::InvalidTree(format!("Access node {access} has no input")))?;
    let mut renderer = Renderer {
        tree,
        oracle,
        model: model.as_str(),
        aliases: oracle.supports_capability(model, Capability::FromGroupAlias),
        numbered: BTreeMap::new(),
        next_group: 0,
        next_view: 0,
        scopes: Vec::new(),
    };
    renderer.number(top);
    let mut writer = SqlWriter::default();
    let outputs = tree.node(access)?.outputs.clone();
    renderer.block(&mut writer, top, &outputs)?;
    Ok(AtomicCommand::new(model.clone(), writer.segments))
}

#[derive(Default)]
struct SqlWriter {
    segments: Vec<CommandSegment>,
}

impl SqlWriter {
    fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(CommandSegment::Text(last)) => last.push_str(text),
            _ => self.segments.push(CommandSegment::Text(text.to_string())),
        }
    }

    fn slot(&mut self, source: u32, max_values: usize, expr_sql: String) {
        self.segments.push(CommandSegment::Slot {
            source,
            max_values,
            expr_sql,
        });
    }

    fn param(&mut self, name: String) {
        self.segments.push(CommandSegment::Param(name));
    }

    /// Plain text; fails when a slot or parameter was written.
    fn into_text(self) -> PlanResult<String> {
        let mut out = String::new();
        for segment in self.segments {
            match segment {
                CommandSegment::Text(text) => out.push_str(&text),
                CommandSegment::Slot { .. } | CommandSegment::Param(_) => {
                    return Err(PlanError::InvalidTree(
                        "runtime value nested in a dependent value expression".to_string(),
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// How a group of the current query level is spelled.
struct Visible {
    alias: String,
    /// Inline views expose their select items `c_n` by element name.
    view_columns: Option<BTreeMap<String, String>>,
}

type Scope = BTreeMap<String, Visible>;

/// Clauses of one query block, top of the chain first.
struct BlockParts {
    limit: Option<(u64, Option<u64>)>,
    order_by: Vec<SortItem>,
    distinct: bool,
    project: Option<Vec<SelectColumn>>,
    having: Vec<Expr>,
    group_by: Option<Vec<Expr>>,
    filters: Vec<Expr>,
    from: NodeId,
}

struct Renderer<'a> {
    tree: &'a PlanTree,
    oracle: &'a CapabilityOracle,
    model: &'a str,
    aliases: bool,
    numbered: BTreeMap<NodeId, String>,
    next_group: usize,
    next_view: usize,
    scopes: Vec<Scope>,
}

impl<'a> Renderer<'a> {
    fn number(&mut self, top: NodeId) {
        let tree = self.tree;
        for id in tree.preorder(top) {
            if let Ok(NodeProps::Source(source)) = tree.props(id) {
                let alias = if source.is_virtual {
                    let alias = format!("v_{}", self.next_view);
                    self.next_view += 1;
                    alias
                } else {
                    self.group_alias(&source.group.definition)
                };
                self.numbered.insert(id, alias);
            }
        }
    }

    fn group_alias(&mut self, definition: &str) -> String {
        if !self.aliases {
            return definition.to_string();
        }
        let alias = format!("g_{}", self.next_group);
        self.next_group += 1;
        alias
    }

    fn alias_of(&self, id: NodeId) -> PlanResult<&str> {
        self.numbered
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| PlanError::InvalidTree(format!("source {id} has no alias")))
    }

    fn supports(&self, capability: Capability) -> bool {
        self.oracle.supports_capability(self.model, capability)
    }

    fn block(&mut self, w: &mut SqlWriter, top: NodeId, outputs: &[Expr]) -> PlanResult<()> {
        let tree = self.tree;
        let parts = self.collect(top)?;
        if let NodeProps::SetOp { op, all } = tree.props(parts.from)? {
            let extra = parts.project.is_some()
                || parts.distinct
                || parts.group_by.is_some()
                || !parts.filters.is_empty()
                || !parts.having.is_empty();
            if extra {
                return Err(PlanError::unplannable(
                    op.sql(),
                    "only ORDER BY and LIMIT may follow a set operation in a source query",
                ));
            }
            return self.set_block(w, parts.from, *op, *all, &parts.order_by, parts.limit);
        }
        let mut scope = Scope::new();
        self.declare(parts.from, &mut scope)?;
        self.scopes.push(scope);
        let result = self.select_block(w, top, &parts, outputs);
        self.scopes.pop();
        result
    }

    fn collect(&self, top: NodeId) -> PlanResult<BlockParts> {
        let mut parts = BlockParts {
            limit: None,
            order_by: Vec::new(),
            distinct: false,
            project: None,
            having: Vec::new(),
            group_by: None,
            filters: Vec::new(),
            from: top,
        };
        // set once a clause evaluated before LIMIT has been seen
        let mut below_limit = false;
        let mut current = top;
        loop {
            let node = self.tree.node(current)?;
            match &node.props {
                NodeProps::Limit { offset, count } => {
                    if below_limit {
                        return Err(PlanError::unplannable(
                            "LIMIT",
                            "row limit below other clauses of a source query",
                        ));
                    }
                    let window = (*offset, *count);
                    parts.limit = Some(match parts.limit {
                        Some(outer) => combine_limit_windows(window, outer),
                        None => window,
                    });
                }
                NodeProps::Sort { items } => {
                    below_limit = true;
                    if parts.order_by.is_empty() {
                        parts.order_by = items.clone();
                    }
                }
                NodeProps::DupRemove => {
                    below_limit = true;
                    parts.distinct = true;
                }
                NodeProps::Project { columns } => {
                    if parts.project.is_some() {
                        return Err(PlanError::InvalidTree(format!(
                            "two projections in the query block of node {top}"
                        )));
                    }
                    parts.project = Some(columns.clone());
                }
                NodeProps::Select {
                    criteria,
                    is_having,
                } => {
                    below_limit = true;
                    if *is_having {
                        parts.having.push(criteria.clone());
                    } else {
                        parts.filters.push(criteria.clone());
                    }
                }
                NodeProps::Grouping { group_by, .. } => {
                    below_limit = true;
                    parts.group_by = Some(group_by.clone());
                }
                NodeProps::Source(_) | NodeProps::Join { .. } | NodeProps::SetOp { .. } => {
                    parts.from = current;
                    break;
                }
                NodeProps::Access { .. } | NodeProps::Null { .. } => {
                    return Err(PlanError::InvalidTree(format!(
                        "{} node {current} inside a source query",
                        node.kind()
                    )));
                }
            }
            current = node.children().first().copied().ok_or_else(|| {
                PlanError::InvalidTree(format!("{} node {current} has no input", node.kind()))
            })?;
        }
        // canonical plans stack conjuncts bottom-up
        parts.filters.reverse();
        parts.having.reverse();
        Ok(parts)
    }

    /// Make the groups of a FROM subtree visible, without entering views.
    fn declare(&self, id: NodeId, scope: &mut Scope) -> PlanResult<()> {
        let node = self.tree.node(id)?;
        match &node.props {
            NodeProps::Source(source) => {
                let alias = self.alias_of(id)?.to_string();
                let view_columns = source.is_virtual.then(|| {
                    source
                        .elements
                        .iter()
                        .enumerate()
                        .map(|(i, e)| (e.name.to_ascii_lowercase(), format!("c_{i}")))
                        .collect()
                });
                scope.insert(
                    source.group.name.clone(),
                    Visible {
                        alias,
                        view_columns,
                    },
                );
            }
            _ => {
                for child in node.children() {
                    self.declare(*child, scope)?;
                }
            }
        }
        Ok(())
    }

    fn select_block(
        &mut self,
        w: &mut SqlWriter,
        top: NodeId,
        parts: &BlockParts,
        outputs: &[Expr],
    ) -> PlanResult<()> {
        w.push("SELECT ");
        if parts.distinct {
            w.push("DISTINCT ");
        }
        let names: Vec<String> = match &parts.project {
            Some(columns) => {
                let exprs: Vec<&Expr> = columns.iter().map(|c| &c.expr).collect();
                self.select_list(w, &exprs)?;
                columns.iter().map(|c| c.name.clone()).collect()
            }
            None => {
                let natural;
                let items = if outputs.is_empty() {
                    natural = self.tree.natural_outputs(top)?;
                    &natural
                } else {
                    outputs
                };
                let exprs: Vec<&Expr> = items.iter().collect();
                self.select_list(w, &exprs)?;
                items.iter().map(Expr::output_name).collect()
            }
        };

        w.push(" FROM ");
        let mut conditions = parts.filters.clone();
        self.from(w, parts.from, &mut conditions)?;
        if let Some(criteria) = conjoin(conditions) {
            w.push(" WHERE ");
            self.expr(w, &criteria)?;
        }
        if let Some(group_by) = &parts.group_by
            && !group_by.is_empty()
        {
            w.push(" GROUP BY ");
            self.list(w, group_by)?;
        }
        if let Some(having) = conjoin(parts.having.iter().cloned()) {
            w.push(" HAVING ");
            self.expr(w, &having)?;
        }
        self.order_by(w, &parts.order_by, &names)?;
        limit(w, parts.limit);
        Ok(())
    }

    fn select_list(&mut self, w: &mut SqlWriter, exprs: &[&Expr]) -> PlanResult<()> {
        if exprs.is_empty() {
            w.push("1 AS c_0");
            return Ok(());
        }
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            self.expr(w, expr)?;
            w.push(&format!(" AS c_{i}"));
        }
        Ok(())
    }

    fn set_block(
        &mut self,
        w: &mut SqlWriter,
        set_op: NodeId,
        op: SetOperator,
        all: bool,
        order_by: &[SortItem],
        window: Option<(u64, Option<u64>)>,
    ) -> PlanResult<()> {
        for (i, branch) in self.tree.children(set_op)?.into_iter().enumerate() {
            if i > 0 {
                w.push(&set_keyword(op, all));
            }
            let wrap = matches!(
                self.tree.props(branch)?,
                NodeProps::Limit { .. } | NodeProps::Sort { .. } | NodeProps::SetOp { .. }
            );
            if wrap {
                w.push("(");
            }
            self.block(w, branch, &[])?;
            if wrap {
                w.push(")");
            }
        }
        let names: Vec<String> = self
            .tree
            .natural_outputs(set_op)?
            .iter()
            .map(Expr::output_name)
            .collect();
        self.order_by(w, order_by, &names)?;
        limit(w, window);
        Ok(())
    }

    fn from(&mut self, w: &mut SqlWriter, id: NodeId, conditions: &mut Vec<Expr>) -> PlanResult<()> {
        let tree = self.tree;
        let node = tree.node(id)?;
        match &node.props {
            NodeProps::Source(source) if source.is_virtual => {
                let view = node.children().first().copied().ok_or_else(|| {
                    PlanError::InvalidTree(format!("view {} has no definition", source.group))
                })?;
                w.push("(");
                self.block(w, view, &[])?;
                w.push(") AS ");
                w.push(self.alias_of(id)?);
            }
            NodeProps::Source(source) => {
                w.push(&source.group.definition);
                if self.aliases {
                    w.push(" AS ");
                    w.push(self.alias_of(id)?);
                }
            }
            NodeProps::Select {
                criteria,
                is_having: false,
            } => {
                conditions.push(criteria.clone());
                let input = tree.child(id, 0)?;
                self.from(w, input, conditions)?;
            }
            NodeProps::Join {
                join_type,
                criteria,
                ..
            } => {
                let (left, right) = (tree.child(id, 0)?, tree.child(id, 1)?);
                let cross = *join_type == JoinType::Cross
                    && criteria.is_empty()
                    && self.supports(Capability::JoinCross);
                let keyword = match join_type {
                    JoinType::Cross if !cross => JoinType::Inner.sql(),
                    other => other.sql(),
                };

                let mut left_filters = Vec::new();
                let mut right_filters = Vec::new();
                self.join_input(w, left, &mut left_filters, false)?;
                w.push(" ");
                w.push(keyword);
                w.push(" ");
                self.join_input(w, right, &mut right_filters, true)?;

                let mut on = criteria.clone();
                match join_type {
                    JoinType::FullOuter if !(left_filters.is_empty() && right_filters.is_empty()) => {
                        return Err(PlanError::unplannable(
                            "FULL OUTER JOIN",
                            "join inputs filtered inside a source query",
                        ));
                    }
                    // the null-extended side is filtered before the join
                    JoinType::LeftOuter => {
                        conditions.extend(left_filters);
                        on.extend(right_filters);
                    }
                    _ => {
                        conditions.extend(left_filters);
                        conditions.extend(right_filters);
                    }
                }
                if !cross {
                    w.push(" ON ");
                    match conjoin(on) {
                        Some(criteria) => self.expr(w, &criteria)?,
                        None => w.push("1 = 1"),
                    }
                }
            }
            other => {
                return Err(PlanError::InvalidTree(format!(
                    "{} node {id} in the FROM clause of a source query",
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    fn join_input(
        &mut self,
        w: &mut SqlWriter,
        id: NodeId,
        filters: &mut Vec<Expr>,
        nested: bool,
    ) -> PlanResult<()> {
        let mut below = id;
        while let NodeProps::Select { .. } = self.tree.props(below)? {
            below = self.tree.child(below, 0)?;
        }
        let wrap = nested && matches!(self.tree.props(below)?, NodeProps::Join { .. });
        if wrap {
            w.push("(");
        }
        self.from(w, id, filters)?;
        if wrap {
            w.push(")");
        }
        Ok(())
    }

    fn order_by(&mut self, w: &mut SqlWriter, items: &[SortItem], names: &[String]) -> PlanResult<()> {
        for (i, item) in items.iter().enumerate() {
            w.push(if i == 0 { " ORDER BY " } else { ", " });
            match item.expr.as_column() {
                Some(symbol) if symbol.is_derived() => {
                    let position = names
                        .iter()
                        .position(|n| n.eq_ignore_ascii_case(&symbol.name))
                        .ok_or_else(|| {
                            PlanError::unplannable(
                                "ORDER BY",
                                format!("sort key '{}' is not a column of the source query", symbol.name),
                            )
                        })?;
                    w.push(&format!("c_{position}"));
                }
                _ => self.expr(w, &item.expr)?,
            }
            if !item.ascending {
                w.push(" DESC");
            }
        }
        Ok(())
    }

    fn list(&mut self, w: &mut SqlWriter, exprs: &[Expr]) -> PlanResult<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            self.expr(w, expr)?;
        }
        Ok(())
    }

    fn column(&self, symbol: &ElementSymbol, outer: bool) -> PlanResult<String> {
        let Some(group) = &symbol.group else {
            return Ok(symbol.name.clone());
        };
        for scope in self.scopes.iter().rev().skip(usize::from(outer)) {
            let Some(visible) = scope.get(group) else {
                continue;
            };
            return match &visible.view_columns {
                Some(columns) => columns
                    .get(&symbol.name.to_ascii_lowercase())
                    .map(|c| format!("{}.{c}", visible.alias))
                    .ok_or_else(|| {
                        PlanError::unplannable(symbol.qualified_name(), "view has no such column")
                    }),
                None => Ok(format!("{}.{}", visible.alias, symbol.name)),
            };
        }
        Err(PlanError::unplannable(
            symbol.qualified_name(),
            "column is not visible in the source query",
        ))
    }

    /// Whether some block of this command declares the group of `symbol`.
    fn declared(&self, symbol: &ElementSymbol) -> bool {
        symbol
            .group
            .as_ref()
            .is_none_or(|group| self.scopes.iter().any(|scope| scope.contains_key(group)))
    }

    fn operand(&mut self, w: &mut SqlWriter, expr: &Expr) -> PlanResult<()> {
        if let Expr::BinaryOp { .. } = expr {
            w.push("(");
            self.expr(w, expr)?;
            w.push(")");
            Ok(())
        } else {
            self.expr(w, expr)
        }
    }

    fn expr(&mut self, w: &mut SqlWriter, expr: &Expr) -> PlanResult<()> {
        match expr {
            Expr::Column(symbol) => w.push(&self.column(symbol, false)?),
            Expr::OuterRef(symbol) if !self.declared(symbol) => w.param(symbol.qualified_name()),
            Expr::OuterRef(symbol) => w.push(&self.column(symbol, true)?),
            Expr::Literal(value) => w.push(&value.to_sql()),
            Expr::TypedNull(_) => w.push("NULL"),
            Expr::BinaryOp { left, op, right } => {
                self.operand(w, left)?;
                w.push(&format!(" {} ", op.sql()));
                self.operand(w, right)?;
            }
            Expr::Not(inner) => {
                w.push("NOT ");
                self.operand(w, inner)?;
            }
            Expr::IsNull { expr, negated } => {
                self.operand(w, expr)?;
                w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                self.operand(w, expr)?;
                w.push(if *negated { " NOT IN (" } else { " IN (" });
                self.list(w, list)?;
                w.push(")");
            }
            Expr::Function { name, args, .. } => {
                w.push(name);
                w.push("(");
                self.list(w, args)?;
                w.push(")");
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                w.push(func.name());
                match arg {
                    None => w.push("(*)"),
                    Some(arg) => {
                        w.push(if *distinct { "(DISTINCT " } else { "(" });
                        self.expr(w, arg)?;
                        w.push(")");
                    }
                }
            }
            Expr::Case {
                operand,
                branches,
                else_expr,
            } => {
                w.push("CASE");
                if let Some(operand) = operand {
                    w.push(" ");
                    self.expr(w, operand)?;
                }
                for (when, then) in branches {
                    w.push(" WHEN ");
                    self.expr(w, when)?;
                    w.push(" THEN ");
                    self.expr(w, then)?;
                }
                if let Some(else_expr) = else_expr {
                    w.push(" ELSE ");
                    self.expr(w, else_expr)?;
                }
                w.push(" END");
            }
            Expr::Subquery { kind, command } => match kind {
                SubqueryKind::Scalar(_) => {
                    w.push("(");
                    self.command(w, command)?;
                    w.push(")");
                }
                SubqueryKind::Exists { negated } => {
                    w.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                    self.command(w, command)?;
                    w.push(")");
                }
                SubqueryKind::In { expr, negated } => {
                    self.operand(w, expr)?;
                    w.push(if *negated { " NOT IN (" } else { " IN (" });
                    self.command(w, command)?;
                    w.push(")");
                }
            },
            Expr::DependentSet {
                expr,
                source,
                max_values,
            } => {
                let mut inner = SqlWriter::default();
                self.operand(&mut inner, expr)?;
                w.slot(*source, *max_values, inner.into_text()?);
            }
        }
        Ok(())
    }

    fn command(&mut self, w: &mut SqlWriter, command: &Command) -> PlanResult<()> {
        match command {
            Command::Query(query) => {
                let mut scope = Scope::new();
                for group in query.from.iter().flat_map(FromItem::groups) {
                    let alias = self.group_alias(&group.definition);
                    scope.insert(
                        group.name.clone(),
                        Visible {
                            alias,
                            view_columns: None,
                        },
                    );
                }
                self.scopes.push(scope);
                let result = self.query(w, query);
                self.scopes.pop();
                result
            }
            Command::SetQuery(set) => {
                for (i, branch) in [&set.left, &set.right].into_iter().enumerate() {
                    if i > 0 {
                        w.push(&set_keyword(set.op, set.all));
                    }
                    let wrap = match branch {
                        Command::Query(query) => !query.order_by.is_empty() || query.limit.is_some(),
                        Command::SetQuery(_) => true,
                    };
                    if wrap {
                        w.push("(");
                    }
                    self.command(w, branch)?;
                    if wrap {
                        w.push(")");
                    }
                }
                let names: Vec<String> = set.left.output_columns().into_iter().map(|c| c.name).collect();
                let items: Vec<SortItem> = set
                    .order_by
                    .iter()
                    .map(|o| SortItem {
                        expr: o.expr.clone(),
                        ascending: o.ascending,
                    })
                    .collect();
                self.order_by(w, &items, &names)?;
                limit(w, set.limit.map(|l| (l.offset, l.count)));
                Ok(())
            }
        }
    }

    fn query(&mut self, w: &mut SqlWriter, query: &Query) -> PlanResult<()> {
        w.push("SELECT ");
        if query.distinct {
            w.push("DISTINCT ");
        }
        let exprs: Vec<&Expr> = query.select.iter().map(|c| &c.expr).collect();
        self.select_list(w, &exprs)?;
        for (i, item) in query.from.iter().enumerate() {
            w.push(if i == 0 { " FROM " } else { ", " });
            self.from_item(w, item)?;
        }
        if let Some(criteria) = &query.criteria {
            w.push(" WHERE ");
            self.expr(w, criteria)?;
        }
        if !query.group_by.is_empty() {
            w.push(" GROUP BY ");
            self.list(w, &query.group_by)?;
        }
        if let Some(having) = &query.having {
            w.push(" HAVING ");
            self.expr(w, having)?;
        }
        let names: Vec<String> = query.select.iter().map(|c| c.name.clone()).collect();
        let items: Vec<SortItem> = query
            .order_by
            .iter()
            .map(|o| SortItem {
                expr: o.expr.clone(),
                ascending: o.ascending,
            })
            .collect();
        self.order_by(w, &items, &names)?;
        limit(w, query.limit.map(|l| (l.offset, l.count)));
        Ok(())
    }

    fn from_item(&mut self, w: &mut SqlWriter, item: &FromItem) -> PlanResult<()> {
        match item {
            FromItem::Group(group) => {
                let alias = self
                    .scopes
                    .last()
                    .and_then(|scope| scope.get(&group.name))
                    .map(|visible| visible.alias.clone())
                    .ok_or_else(|| {
                        PlanError::InvalidTree(format!("group {} is not declared", group.name))
                    })?;
                w.push(&group.definition);
                if self.aliases {
                    w.push(" AS ");
                    w.push(&alias);
                }
            }
            FromItem::Join {
                left,
                right,
                join_type,
                criteria,
            } => {
                let cross = *join_type == JoinType::Cross
                    && criteria.is_empty()
                    && self.supports(Capability::JoinCross);
                self.from_item(w, left)?;
                w.push(" ");
                w.push(match join_type {
                    JoinType::Cross if !cross => JoinType::Inner.sql(),
                    other => other.sql(),
                });
                w.push(" ");
                let wrap = matches!(right.as_ref(), FromItem::Join { .. });
                if wrap {
                    w.push("(");
                }
                self.from_item(w, right)?;
                if wrap {
                    w.push(")");
                }
                if !cross {
                    w.push(" ON ");
                    match conjoin(criteria.iter().cloned()) {
                        Some(criteria) => self.expr(w, &criteria)?,
                        None => w.push("1 = 1"),
                    }
                }
            }
        }
        Ok(())
    }
}

fn set_keyword(op: SetOperator, all: bool) -> String {
    format!(" {}{} ", op.sql(), if all { " ALL" } else { "" })
}

fn limit(w: &mut SqlWriter, window: Option<(u64, Option<u64>)>) {
    let Some((offset, count)) = window else {
        return;
    };
    if let Some(count) = count {
        w.push(&format!(" LIMIT {count}"));
    }
    if offset > 0 {
        w.push(&format!(" OFFSET {offset}"));
    }
}
