//! Capability Oracle: the per-run, read-only view of source capabilities.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{Capability, CapabilitiesFinder, SourceCapabilities};
use crate::command::{Command, FromItem, JoinType, SetOperator};
use crate::config::OptimizerConfig;
use crate::error::PlanResult;
use crate::expr::{AggregateFunction, BinaryOperator, Expr, SubqueryKind};
use crate::metadata::QueryMetadata;

/// Immutable capability snapshot for one optimization run.
#[derive(Debug, Clone)]
pub struct CapabilityOracle {
    models: BTreeMap<String, Arc<SourceCapabilities>>,
    /// Model of each group referenced from subqueries; `None` for views.
    subquery_groups: BTreeMap<String, Option<String>>,
    fallback: SourceCapabilities,
    same_connector: bool,
    default_max_in_list: usize,
}

impl CapabilityOracle {
    /// Load the capabilities of `models` and the groups referenced by
    /// `subqueries` once, up front.
    pub fn load(
        finder: &dyn CapabilitiesFinder,
        metadata: &dyn QueryMetadata,
        models: impl IntoIterator<Item = String>,
        subqueries: &[Arc<Command>],
        config: &OptimizerConfig,
    ) -> PlanResult<Self> {
        let mut wanted: BTreeSet<String> = models.into_iter().collect();
        let mut subquery_groups = BTreeMap::new();
        for command in subqueries {
            for group in command.all_groups() {
                let record = metadata.group(&group.definition)?;
                let model = (!record.is_virtual()).then(|| record.model.clone());
                if let Some(model) = &model {
                    wanted.insert(model.clone());
                }
                subquery_groups.insert(group.definition.to_ascii_lowercase(), model);
            }
        }
        let mut loaded = BTreeMap::new();
        for model in wanted {
            let caps = finder.find_capabilities(&model)?;
            loaded.insert(model.to_ascii_lowercase(), caps);
        }
        Ok(Self {
            models: loaded,
            subquery_groups,
            fallback: SourceCapabilities::none(),
            same_connector: config.same_connector_pushdown,
            default_max_in_list: config.default_max_in_list,
        })
    }

    /// Snapshot from an explicit mapping.
    pub fn from_models(
        models: impl IntoIterator<Item = (String, SourceCapabilities)>,
        config: &OptimizerConfig,
    ) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|(m, c)| (m.to_ascii_lowercase(), Arc::new(c)))
                .collect(),
            subquery_groups: BTreeMap::new(),
            fallback: SourceCapabilities::none(),
            same_connector: config.same_connector_pushdown,
            default_max_in_list: config.default_max_in_list,
        }
    }

    pub fn capabilities(&self, model: &str) -> &SourceCapabilities {
        self.models
            .get(&model.to_ascii_lowercase())
            .map(|c| c.as_ref())
            .unwrap_or(&self.fallback)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn supports_capability(&self, model: &str, capability: Capability) -> bool {
        self.capabilities(model).supports(capability)
    }

    pub fn supports_function(&self, model: &str, name: &str) -> bool {
        self.capabilities(model).supports_function(name)
    }

    pub fn supports_join(&self, model: &str, join_type: JoinType) -> bool {
        let caps = self.capabilities(model);
        match join_type {
            JoinType::Inner => caps.supports(Capability::JoinInner),
            JoinType::LeftOuter | JoinType::RightOuter => caps.supports(Capability::JoinOuter),
            JoinType::FullOuter => caps.supports(Capability::JoinFullOuter),
            // rendered as INNER JOIN ... ON 1 = 1 when CROSS JOIN is missing
            JoinType::Cross => {
                caps.supports(Capability::JoinCross) || caps.supports(Capability::JoinInner)
            }
        }
    }

    pub fn supports_set_op(&self, model: &str, op: SetOperator) -> bool {
        let flag = match op {
            SetOperator::Union => Capability::Union,
            SetOperator::Except => Capability::Except,
            SetOperator::Intersect => Capability::Intersect,
        };
        self.supports_capability(model, flag)
    }

    pub fn supports_aggregate(&self, model: &str, func: AggregateFunction, star: bool, distinct: bool) -> bool {
        let flag = match func {
            AggregateFunction::Count if star => Capability::AggregateCountStar,
            AggregateFunction::Count => Capability::AggregateCount,
            AggregateFunction::Sum => Capability::AggregateSum,
            AggregateFunction::Avg => Capability::AggregateAvg,
            AggregateFunction::Min => Capability::AggregateMin,
            AggregateFunction::Max => Capability::AggregateMax,
        };
        self.supports_capability(model, flag)
            && (!distinct || self.supports_capability(model, Capability::AggregateDistinct))
    }

    /// Declared IN-list cap of the model.
    pub fn max_in_list_size(&self, model: &str) -> Option<usize> {
        self.capabilities(model).max_in_list_size
    }

    /// Cap used for dependent value sets: declared or configured default.
    pub fn in_list_cap(&self, model: &str) -> usize {
        self.max_in_list_size(model)
            .unwrap_or(self.default_max_in_list)
            .max(1)
    }

    /// Whether two models may share one atomic command. Models with equal
    /// connector ids are merged when same-connector pushdown is enabled.
    pub fn same_domain(&self, a: &str, b: &str) -> bool {
        if a.eq_ignore_ascii_case(b) {
            return true;
        }
        if !self.same_connector {
            return false;
        }
        match (
            &self.capabilities(a).connector_id,
            &self.capabilities(b).connector_id,
        ) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Whether every operator, function, aggregate and subquery in `expr`
    /// can be evaluated by the model.
    pub fn can_push_expr(&self, model: &str, expr: &Expr) -> bool {
        let caps = self.capabilities(model);
        let local = match expr {
            Expr::Column(_) | Expr::OuterRef(_) | Expr::Literal(_) | Expr::TypedNull(_) => true,
            Expr::BinaryOp { op, .. } => match op {
                BinaryOperator::And => true,
                BinaryOperator::Or => caps.supports(Capability::CriteriaOr),
                BinaryOperator::Eq | BinaryOperator::NotEq => {
                    caps.supports(Capability::CriteriaCompareEq)
                }
                op if op.is_comparison() => caps.supports(Capability::CriteriaCompareOrdered),
                op => caps.supports_function(op.sql()),
            },
            Expr::Not(_) => caps.supports(Capability::CriteriaNot),
            Expr::IsNull { .. } => caps.supports(Capability::CriteriaIsNull),
            Expr::InList { list, .. } => {
                caps.supports(Capability::CriteriaIn)
                    && caps.max_in_list_size.is_none_or(|max| list.len() <= max)
            }
            Expr::Function { name, .. } => caps.supports_function(name),
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => self.supports_aggregate(model, *func, arg.is_none(), *distinct),
            Expr::Case { .. } => caps.supports(Capability::Case),
            Expr::Subquery { kind, command } => self.can_push_subquery(model, kind, command),
            Expr::DependentSet { .. } => caps.supports(Capability::CriteriaIn),
        };
        local && expr.children().into_iter().all(|c| self.can_push_expr(model, c))
    }

    fn can_push_subquery(&self, model: &str, kind: &SubqueryKind, command: &Command) -> bool {
        let form = match kind {
            SubqueryKind::Scalar(_) => Capability::SubqueryScalar,
            SubqueryKind::Exists { .. } => Capability::SubqueryExists,
            SubqueryKind::In { .. } => Capability::SubqueryIn,
        };
        if !self.supports_capability(model, form) {
            return false;
        }
        if command.is_correlated() && !self.supports_capability(model, Capability::SubqueryCorrelated)
        {
            return false;
        }
        self.can_push_command(model, command)
    }

    /// Whether an entire command can be sent to the model as written.
    pub fn can_push_command(&self, model: &str, command: &Command) -> bool {
        let groups_ok = command.groups().iter().all(|group| {
            match self.subquery_groups.get(&group.definition.to_ascii_lowercase()) {
                Some(Some(group_model)) => self.same_domain(model, group_model),
                _ => false,
            }
        });
        if !groups_ok {
            return false;
        }
        match command {
            Command::Query(query) => {
                let caps = self.capabilities(model);
                let clauses_ok = (query.group_by.is_empty() || caps.supports(Capability::GroupBy))
                    && (query.having.is_none() || caps.supports(Capability::Having))
                    && (query.order_by.is_empty() || caps.supports(Capability::OrderBy))
                    && (!query.distinct || caps.supports(Capability::SelectDistinct))
                    && query.limit.is_none_or(|limit| {
                        (limit.count.is_none() || caps.supports(Capability::RowLimit))
                            && (limit.offset == 0 || caps.supports(Capability::RowOffset))
                    })
                    && (query.select.iter().all(|c| c.expr.is_column())
                        || caps.supports(Capability::SelectExpression))
                    && (query.group_by.iter().all(Expr::is_column)
                        || caps.supports(Capability::GroupByFunctions))
                    && query.from.iter().all(|item| self.joins_supported(model, item))
                    && (query.from.len() < 2 || self.supports_join(model, JoinType::Cross));
                clauses_ok
                    && command
                        .exprs()
                        .into_iter()
                        .all(|e| self.can_push_expr(model, e))
            }
            Command::SetQuery(set) => {
                self.supports_set_op(model, set.op)
                    && (set.order_by.is_empty()
                        || self.supports_capability(model, Capability::SetOrderBy))
                    && set.limit.is_none_or(|limit| {
                        (limit.count.is_none()
                            || self.supports_capability(model, Capability::RowLimit))
                            && (limit.offset == 0
                                || self.supports_capability(model, Capability::RowOffset))
                    })
                    && self.can_push_command(model, &set.left)
                    && self.can_push_command(model, &set.right)
            }
        }
    }

    fn joins_supported(&self, model: &str, item: &FromItem) -> bool {
        match item {
            FromItem::Group(_) => true,
            FromItem::Join {
                left,
                right,
                join_type,
                ..
            } => {
                self.supports_join(model, *join_type)
                    && self.joins_supported(model, left)
                    && self.joins_supported(model, right)
            }
        }
    }
}
