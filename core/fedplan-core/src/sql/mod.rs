//! SQL 프론트엔드
//!
//! Parses SQL text with `sqlparser` and resolves it against metadata into a
//! [`Command`](crate::command::Command).

mod parser;
mod resolver;

pub use parser::{SqlParser, split_hints};
pub use resolver::{CommandResolver, convert_binary_op, extract_u64};
