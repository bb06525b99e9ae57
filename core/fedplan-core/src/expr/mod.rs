//! 표현식 모델
//!
//! Symbols, literals and the immutable expression tree shared by plan nodes.
//! Every sub-expression sits behind an `Arc`, so cloning an expression is
//! shallow and rewrites always build new trees.

mod eval;
mod visit;

pub use eval::{
    bound_column, equi_join_pairs, evaluate_constant, is_null_rejecting, is_statically_false,
    is_statically_true,
};
pub use visit::{conjoin, split_conjuncts};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::datatypes::DataType;

use crate::command::Command;

/// Literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
}

impl ScalarValue {
    /// Get the Arrow DataType for this value.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Boolean(_) => DataType::Boolean,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Render as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            ScalarValue::Null => "NULL".to_string(),
            ScalarValue::Int32(v) => v.to_string(),
            ScalarValue::Int64(v) => v.to_string(),
            ScalarValue::Float64(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{v:.1}")
                } else {
                    v.to_string()
                }
            }
            ScalarValue::Utf8(s) => format!("'{}'", s.replace('\'', "''")),
            ScalarValue::Boolean(true) => "TRUE".to_string(),
            ScalarValue::Boolean(false) => "FALSE".to_string(),
        }
    }
}

// Floats compare by bit pattern so literals can key hash maps.
impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Int32(v) => v.hash(state),
            ScalarValue::Int64(v) => v.hash(state),
            ScalarValue::Float64(v) => v.to_bits().hash(state),
            ScalarValue::Utf8(v) => v.hash(state),
            ScalarValue::Boolean(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Reference to a group in the scope of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupSymbol {
    /// Name used in scope: the alias, or the full name when unaliased
    pub name: String,
    /// Metadata id of the group (full name)
    pub definition: String,
}

impl GroupSymbol {
    pub fn new(definition: impl Into<String>) -> Self {
        let definition = definition.into();
        Self {
            name: definition.clone(),
            definition,
        }
    }

    pub fn aliased(alias: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: alias.into(),
            definition: definition.into(),
        }
    }

    pub fn is_aliased(&self) -> bool {
        self.name != self.definition
    }
}

impl fmt::Display for GroupSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_aliased() {
            write!(f, "{} AS {}", self.definition, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Reference to a column.
///
/// Columns of a group carry the group's scope name; columns produced by a
/// projection or set operation are derived and carry none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementSymbol {
    pub group: Option<String>,
    pub name: String,
    pub metadata_id: Option<String>,
    pub data_type: DataType,
}

impl ElementSymbol {
    pub fn new(group: &GroupSymbol, name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            group: Some(group.name.clone()),
            metadata_id: Some(format!("{}.{}", group.definition, name)),
            name,
            data_type,
        }
    }

    pub fn derived(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            group: None,
            name: name.into(),
            metadata_id: None,
            data_type,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.group.is_none()
    }

    pub fn qualified_name(&self) -> String {
        match &self.group {
            Some(group) => format!("{group}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Same column seen through another group name.
    pub fn regrouped(&self, group: &str) -> Self {
        Self {
            group: Some(group.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Display for ElementSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// 이항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOperator {
    // 산술
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    // 비교
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // 논리
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Multiply | Self::Divide | Self::Modulo
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// Operator with operands swapped (`a < b` is `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

/// 집계 함수
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }

    /// Value over an empty input without GROUP BY.
    pub fn identity(self, data_type: &DataType) -> Expr {
        match self {
            Self::Count => Expr::Literal(ScalarValue::Int64(0)),
            _ => Expr::TypedNull(data_type.clone()),
        }
    }

    pub fn return_type(self, arg: Option<&DataType>) -> DataType {
        match (self, arg) {
            (Self::Count, _) => DataType::Int64,
            (Self::Avg, _) => DataType::Float64,
            (Self::Sum, Some(DataType::Float32 | DataType::Float64)) => DataType::Float64,
            (Self::Sum, _) => DataType::Int64,
            (Self::Min | Self::Max, Some(dt)) => dt.clone(),
            (Self::Min | Self::Max, None) => DataType::Null,
        }
    }
}

/// Form of a subquery expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubqueryKind {
    Scalar(DataType),
    Exists { negated: bool },
    In { expr: Arc<Expr>, negated: bool },
}

/// 표현식: 컬럼, 리터럴, 연산자, 함수, 서브쿼리
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// 컬럼 참조
    Column(ElementSymbol),
    /// Correlated reference to a column of an enclosing query
    OuterRef(ElementSymbol),
    /// 리터럴 값
    Literal(ScalarValue),
    /// NULL with a known type
    TypedNull(DataType),
    /// 이항 연산 (+, -, *, /, =, <>, <, >, AND, OR)
    BinaryOp {
        left: Arc<Expr>,
        op: BinaryOperator,
        right: Arc<Expr>,
    },
    Not(Arc<Expr>),
    /// IS [NOT] NULL
    IsNull { expr: Arc<Expr>, negated: bool },
    /// IN (...)
    InList {
        expr: Arc<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// 스칼라 함수 호출 (UPPER, LOWER, ABS ...)
    Function {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    /// 집계 함수 (arg None = COUNT(*))
    Aggregate {
        func: AggregateFunction,
        arg: Option<Arc<Expr>>,
        distinct: bool,
    },
    /// CASE [operand] WHEN .. THEN .. [ELSE ..] END
    Case {
        operand: Option<Arc<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Arc<Expr>>,
    },
    Subquery {
        kind: SubqueryKind,
        command: Arc<Command>,
    },
    /// `expr IN (<values>)` bound at runtime from the independent side of a
    /// dependent join
    DependentSet {
        expr: Arc<Expr>,
        source: u32,
        max_values: usize,
    },
}

impl Expr {
    pub fn column(symbol: ElementSymbol) -> Self {
        Expr::Column(symbol)
    }

    pub fn literal(value: ScalarValue) -> Self {
        Expr::Literal(value)
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Arc::new(left),
            op,
            right: Arc::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Eq, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::And, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Or, right)
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>, return_type: DataType) -> Self {
        Expr::Function {
            name: name.into().to_ascii_uppercase(),
            args,
            return_type,
        }
    }

    pub fn aggregate(func: AggregateFunction, arg: Option<Expr>, distinct: bool) -> Self {
        Expr::Aggregate {
            func,
            arg: arg.map(Arc::new),
            distinct,
        }
    }

    pub fn as_column(&self) -> Option<&ElementSymbol> {
        match self {
            Expr::Column(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, Expr::Column(_))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column(symbol) | Expr::OuterRef(symbol) => symbol.data_type.clone(),
            Expr::Literal(value) => value.data_type(),
            Expr::TypedNull(data_type) => data_type.clone(),
            Expr::BinaryOp { left, op, right } => {
                if op.is_arithmetic() {
                    match (left.data_type(), right.data_type()) {
                        (DataType::Float64, _) | (_, DataType::Float64) => DataType::Float64,
                        (DataType::Int64, _) | (_, DataType::Int64) => DataType::Int64,
                        (DataType::Null, other) => other,
                        (other, _) => other,
                    }
                } else {
                    DataType::Boolean
                }
            }
            Expr::Not(_) | Expr::IsNull { .. } | Expr::InList { .. } | Expr::DependentSet { .. } => {
                DataType::Boolean
            }
            Expr::Function { return_type, .. } => return_type.clone(),
            Expr::Aggregate { func, arg, .. } => {
                let arg_type = arg.as_ref().map(|a| a.data_type());
                func.return_type(arg_type.as_ref())
            }
            Expr::Case {
                branches,
                else_expr,
                ..
            } => branches
                .iter()
                .map(|(_, then)| then.data_type())
                .chain(else_expr.iter().map(|e| e.data_type()))
                .find(|dt| *dt != DataType::Null)
                .unwrap_or(DataType::Null),
            Expr::Subquery { kind, .. } => match kind {
                SubqueryKind::Scalar(data_type) => data_type.clone(),
                _ => DataType::Boolean,
            },
        }
    }

    /// Name of the column this expression produces when projected unnamed.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(symbol) | Expr::OuterRef(symbol) => symbol.name.clone(),
            other => other.to_string(),
        }
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::BinaryOp { .. } => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(symbol) | Expr::OuterRef(symbol) => write!(f, "{symbol}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::TypedNull(_) => f.write_str("NULL"),
            Expr::BinaryOp { left, op, right } => {
                fmt_operand(f, left)?;
                write!(f, " {} ", op.sql())?;
                fmt_operand(f, right)
            }
            Expr::Not(inner) => {
                f.write_str("NOT ")?;
                fmt_operand(f, inner)
            }
            Expr::IsNull { expr, negated } => {
                fmt_operand(f, expr)?;
                f.write_str(if *negated { " IS NOT NULL" } else { " IS NULL" })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                fmt_operand(f, expr)?;
                f.write_str(if *negated { " NOT IN (" } else { " IN (" })?;
                fmt_list(f, list)?;
                f.write_str(")")
            }
            Expr::Function { name, args, .. } => {
                write!(f, "{name}(")?;
                fmt_list(f, args)?;
                f.write_str(")")
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => match arg {
                None => write!(f, "{}(*)", func.name()),
                Some(arg) if *distinct => write!(f, "{}(DISTINCT {arg})", func.name()),
                Some(arg) => write!(f, "{}({arg})", func.name()),
            },
            Expr::Case {
                operand,
                branches,
                else_expr,
            } => {
                f.write_str("CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {operand}")?;
                }
                for (when, then) in branches {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(else_expr) = else_expr {
                    write!(f, " ELSE {else_expr}")?;
                }
                f.write_str(" END")
            }
            Expr::Subquery { kind, .. } => match kind {
                SubqueryKind::Scalar(_) => f.write_str("(<subquery>)"),
                SubqueryKind::Exists { negated: false } => f.write_str("EXISTS (<subquery>)"),
                SubqueryKind::Exists { negated: true } => f.write_str("NOT EXISTS (<subquery>)"),
                SubqueryKind::In { expr, negated } => {
                    fmt_operand(f, expr)?;
                    f.write_str(if *negated {
                        " NOT IN (<subquery>)"
                    } else {
                        " IN (<subquery>)"
                    })
                }
            },
            Expr::DependentSet { expr, source, .. } => {
                fmt_operand(f, expr)?;
                write!(f, " IN (<dependent values #{source}>)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g1() -> GroupSymbol {
        GroupSymbol::new("pm1.g1")
    }

    #[test]
    fn test_element_symbol_identity() {
        let a = ElementSymbol::new(&g1(), "e1", DataType::Utf8);
        let b = ElementSymbol::new(&GroupSymbol::aliased("x", "pm1.g1"), "e1", DataType::Utf8);
        assert_eq!(a.metadata_id, b.metadata_id);
        assert_ne!(a, b);
        assert_eq!(b.qualified_name(), "x.e1");
    }

    #[test]
    fn test_display() {
        let e1 = Expr::Column(ElementSymbol::new(&g1(), "e1", DataType::Utf8));
        let e2 = Expr::Column(ElementSymbol::new(&g1(), "e2", DataType::Int32));
        let expr = Expr::and(
            Expr::eq(e1, Expr::Literal(ScalarValue::Utf8("it's".into()))),
            Expr::binary(e2, BinaryOperator::Gt, Expr::Literal(ScalarValue::Int32(5))),
        );
        assert_eq!(
            expr.to_string(),
            "(pm1.g1.e1 = 'it''s') AND (pm1.g1.e2 > 5)"
        );
    }

    #[test]
    fn test_data_types() {
        let e2 = Expr::Column(ElementSymbol::new(&g1(), "e2", DataType::Int32));
        let sum = Expr::aggregate(AggregateFunction::Sum, Some(e2.clone()), false);
        assert_eq!(sum.data_type(), DataType::Int64);
        let max = Expr::aggregate(AggregateFunction::Max, Some(e2.clone()), false);
        assert_eq!(max.data_type(), DataType::Int32);
        let plus = Expr::binary(e2, BinaryOperator::Plus, Expr::Literal(ScalarValue::Float64(1.5)));
        assert_eq!(plus.data_type(), DataType::Float64);
        assert_eq!(
            AggregateFunction::Count.identity(&DataType::Int64),
            Expr::Literal(ScalarValue::Int64(0))
        );
    }

    #[test]
    fn test_float_literal_hash_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Expr::Literal(ScalarValue::Float64(1.0)));
        assert!(set.contains(&Expr::Literal(ScalarValue::Float64(1.0))));
        assert_eq!(ScalarValue::Float64(2.0).to_sql(), "2.0");
    }
}
