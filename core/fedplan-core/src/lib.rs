//! # fedplan: Federated Relational Query Optimizer
//!
//! fedplan은 여러 데이터 소스에 걸친 SQL 쿼리를 위한 관계형 옵티마이저입니다.
//! 쿼리를 소스별 SQL 명령(atomic command)과 로컬에서 실행할 연산자 트리로 나누며,
//! 각 소스가 실제로 지원하는 기능(capability)만큼만 작업을 밀어 넣습니다.
//!
//! ## 주요 특징
//!
//! - **Capability 기반 푸시다운**: 조건, 조인, 집계, 정렬, LIMIT을 소스가 지원하는 만큼 전달
//! - **Work-list 규칙 엔진**: 순서가 정해진 규칙 목록, 반복 상한으로 종료 보장
//! - **조인 계획**: 같은 소스끼리 묶는 조인 순서, access pattern 검증, 조인 전략 선택
//! - **Dependent join**: 한쪽 입력의 값을 다른 쪽 소스에 `IN` 조건으로 배치 전달
//! - **Dead branch 제거**: 항상 거짓인 조건, `LIMIT 0`, 빈 외부 조인 입력 정리
//! - **결정적 출력**: 같은 입력이면 같은 플랜과 같은 SQL 텍스트
//!
//! ## 빠른 시작
//!
//! ```rust
//! use arrow::datatypes::DataType;
//! use fedplan_core::{
//!     GroupDef, InMemoryMetadata, OptimizerConfig, RelationalPlanner, SourceCapabilities,
//!     StaticCapabilitiesFinder,
//! };
//!
//! # fn main() -> fedplan_core::PlanResult<()> {
//! let mut metadata = InMemoryMetadata::new();
//! metadata
//!     .add_group(GroupDef::physical("pm1.g1", "pm1").column("e1", DataType::Utf8))
//!     .add_group(GroupDef::physical("pm2.g1", "pm2").column("e1", DataType::Utf8));
//! let finder = StaticCapabilitiesFinder::new().with_default(SourceCapabilities::full());
//!
//! let planner = RelationalPlanner::new(&metadata, &finder, OptimizerConfig::default());
//! let planned = planner.plan_sql(
//!     "SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
//! )?;
//!
//! // 소스마다 하나의 atomic command
//! assert_eq!(planned.root().models(), vec!["pm1".to_string(), "pm2".to_string()]);
//! println!("{}", planned.root().explain());
//! # Ok(())
//! # }
//! ```
//!
//! ## 계획 파이프라인
//!
//! ```text
//! SQL 문자열 → Parser → AST → Resolver → Command
//!          → PlanBuilder → 캐노니컬 PlanTree
//!          → QueryOptimizer (규칙 10개) → 최적화된 PlanTree
//!          → PlanFinalizer → ExecNode + AtomicCommand
//! ```
//!
//! ## 모듈 구조
//!
//! - [`sql`]: SQL 파서와 이름 해석기 ([`CommandResolver`])
//! - [`plan`]: 플랜 노드 모델과 캐노니컬 플랜 생성
//! - [`capabilities`]: 소스 capability 집합과 [`CapabilityOracle`]
//! - [`optimizer`]: 규칙 엔진과 규칙들
//! - [`finalize`]: 출력 컬럼 할당, SQL 렌더링, 실행 노드 변환
//! - [`planner`]: 전체 흐름을 묶는 [`RelationalPlanner`]

pub mod capabilities;
pub mod command;
pub mod config;
pub mod error;
pub mod expr;
pub mod finalize;
pub mod metadata;
pub mod optimizer;
pub mod plan;
pub mod planner;
pub mod sql;

// Logging utilities
pub mod logging;

#[cfg(test)]
mod test_util;

// Re-export commonly used types
pub use capabilities::{
    CachingCapabilitiesFinder, Capability, CapabilitiesFinder, CapabilityOracle, SourceCapabilities,
    StaticCapabilitiesFinder,
};
pub use command::Command;
pub use config::OptimizerConfig;
pub use error::{PlanError, PlanResult};
pub use finalize::{AtomicCommand, ExecNode, ExecOperator};
pub use metadata::{GroupDef, InMemoryMetadata, MetadataError, QueryMetadata};
pub use plan::{JoinStrategy, PlanTree};
pub use planner::{AnalysisTrace, PlannedQuery, RelationalPlanner};
pub use sql::CommandResolver;
