//! 소스 기능(capability) 모델
//!
//! What each source model can execute natively, how capability sets are
//! found, and the per-run oracle the rules consult.

mod finder;
mod oracle;

pub use finder::{CachingCapabilitiesFinder, CapabilitiesFinder, StaticCapabilitiesFinder};
pub use oracle::CapabilityOracle;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::PlanResult;

/// Boolean capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    // 조건식
    CriteriaCompareEq,
    CriteriaCompareOrdered,
    CriteriaIn,
    CriteriaIsNull,
    CriteriaNot,
    CriteriaOr,
    // SELECT 절
    SelectExpression,
    SelectDistinct,
    Case,
    // FROM 절
    JoinInner,
    JoinOuter,
    JoinFullOuter,
    JoinCross,
    JoinSelfJoin,
    FromGroupAlias,
    FromInlineViews,
    // 집계
    AggregateCount,
    AggregateCountStar,
    AggregateSum,
    AggregateAvg,
    AggregateMin,
    AggregateMax,
    AggregateDistinct,
    GroupBy,
    GroupByFunctions,
    Having,
    // 정렬/제한
    OrderBy,
    RowLimit,
    RowOffset,
    // 집합 연산
    Union,
    Except,
    Intersect,
    SetOrderBy,
    // 서브쿼리
    SubqueryScalar,
    SubqueryExists,
    SubqueryIn,
    SubqueryCorrelated,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::CriteriaCompareEq,
        Capability::CriteriaCompareOrdered,
        Capability::CriteriaIn,
        Capability::CriteriaIsNull,
        Capability::CriteriaNot,
        Capability::CriteriaOr,
        Capability::SelectExpression,
        Capability::SelectDistinct,
        Capability::Case,
        Capability::JoinInner,
        Capability::JoinOuter,
        Capability::JoinFullOuter,
        Capability::JoinCross,
        Capability::JoinSelfJoin,
        Capability::FromGroupAlias,
        Capability::FromInlineViews,
        Capability::AggregateCount,
        Capability::AggregateCountStar,
        Capability::AggregateSum,
        Capability::AggregateAvg,
        Capability::AggregateMin,
        Capability::AggregateMax,
        Capability::AggregateDistinct,
        Capability::GroupBy,
        Capability::GroupByFunctions,
        Capability::Having,
        Capability::OrderBy,
        Capability::RowLimit,
        Capability::RowOffset,
        Capability::Union,
        Capability::Except,
        Capability::Intersect,
        Capability::SetOrderBy,
        Capability::SubqueryScalar,
        Capability::SubqueryExists,
        Capability::SubqueryIn,
        Capability::SubqueryCorrelated,
    ];
}

/// Scalar functions a fully capable source is assumed to support.
/// Arithmetic operators are functions named by their symbol.
const STANDARD_FUNCTIONS: &[&str] = &[
    "+", "-", "*", "/", "%", "UPPER", "LOWER", "CONCAT", "LENGTH", "SUBSTRING", "TRIM", "ABS",
    "ROUND", "CEIL", "FLOOR", "COALESCE", "IFNULL", "NULLIF",
];

/// Capability set of one source model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCapabilities {
    pub capabilities: BTreeSet<Capability>,
    pub functions: BTreeSet<String>,
    pub max_in_list_size: Option<usize>,
    /// Models sharing a connector id form one pushdown domain.
    pub connector_id: Option<String>,
}

impl SourceCapabilities {
    /// A source that can only be scanned.
    pub fn none() -> Self {
        Self::default()
    }

    /// A source supporting every flag and the standard function set.
    pub fn full() -> Self {
        Self {
            capabilities: Capability::ALL.iter().copied().collect(),
            functions: STANDARD_FUNCTIONS.iter().map(|f| f.to_string()).collect(),
            max_in_list_size: None,
            connector_id: None,
        }
    }

    /// Comparisons, IN, IS NULL, NOT, OR and ORDER BY; no joins, grouping or
    /// limits.
    pub fn basic() -> Self {
        Self::none()
            .with(Capability::CriteriaCompareEq)
            .with(Capability::CriteriaCompareOrdered)
            .with(Capability::CriteriaIn)
            .with(Capability::CriteriaIsNull)
            .with(Capability::CriteriaNot)
            .with(Capability::CriteriaOr)
            .with(Capability::OrderBy)
            .with(Capability::FromGroupAlias)
    }

    pub fn from_json(json: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.functions.insert(name.to_ascii_uppercase());
        self
    }

    pub fn without_function(mut self, name: &str) -> Self {
        self.functions
            .retain(|f| !f.eq_ignore_ascii_case(name));
        self
    }

    pub fn with_max_in_list(mut self, size: usize) -> Self {
        self.max_in_list_size = Some(size);
        self
    }

    pub fn with_connector(mut self, id: impl Into<String>) -> Self {
        self.connector_id = Some(id.into());
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn supports_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.eq_ignore_ascii_case(name))
    }
}
