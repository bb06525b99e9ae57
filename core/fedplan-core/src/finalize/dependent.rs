//! Atomic commands and runtime binding of dependent value sets.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashSet;
use serde::Serialize;

use crate::error::{PlanError, PlanResult};
use crate::expr::ScalarValue;

/// Piece of a rendered source query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommandSegment {
    Text(String),
    /// `expr IN (...)` filled from the independent side of a dependent join
    Slot {
        source: u32,
        max_values: usize,
        expr_sql: String,
    },
    /// Correlated reference, bound from the current outer row as `?`
    Param(String),
}

/// SQL sent to one source: the rendering of one Access subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtomicCommand {
    pub model: String,
    /// Text with dependent slots shown as placeholders.
    pub sql: String,
    pub segments: Vec<CommandSegment>,
}

impl AtomicCommand {
    pub(crate) fn new(model: impl Into<String>, segments: Vec<CommandSegment>) -> Self {
        let sql = segments
            .iter()
            .map(|segment| match segment {
                CommandSegment::Text(text) => text.clone(),
                CommandSegment::Slot {
                    source, expr_sql, ..
                } => format!("{expr_sql} IN (<dependent values #{source}>)"),
                CommandSegment::Param(_) => "?".to_string(),
            })
            .collect();
        Self {
            model: model.into(),
            sql,
            segments,
        }
    }

    pub fn is_dependent(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, CommandSegment::Slot { .. }))
    }

    /// Value slots in order of appearance, without repeats.
    pub fn slots(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for segment in &self.segments {
            if let CommandSegment::Slot { source, .. } = segment
                && !out.contains(source)
            {
                out.push(*source);
            }
        }
        out
    }

    /// Outer references in the order of their `?` markers.
    pub fn parameters(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                CommandSegment::Param(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Parseable stand-in for the command with every slot bound to `NULL`.
    pub fn probe_sql(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                CommandSegment::Text(text) => text.clone(),
                CommandSegment::Slot { expr_sql, .. } => format!("{expr_sql} IN (NULL)"),
                CommandSegment::Param(_) => "NULL".to_string(),
            })
            .collect()
    }

    /// Concrete queries for the runtime value sets of every slot.
    ///
    /// Each value set is deduplicated and split into batches of at most the
    /// slot's cap; one query is produced per combination of batches. A slot
    /// with no values yields no queries at all.
    pub fn bind_dependent_values(&self, values: &BTreeMap<u32, Vec<ScalarValue>>) -> PlanResult<Vec<String>> {
        let slots = self.slots();
        if slots.is_empty() {
            return Ok(vec![self.sql.clone()]);
        }
        let mut batches: BTreeMap<u32, Vec<Vec<ScalarValue>>> = BTreeMap::new();
        for segment in &self.segments {
            let CommandSegment::Slot {
                source, max_values, ..
            } = segment
            else {
                continue;
            };
            if batches.contains_key(source) {
                continue;
            }
            let set = values.get(source).ok_or_else(|| {
                PlanError::unplannable(
                    format!("dependent values #{source}"),
                    "no value set was bound for the slot",
                )
            })?;
            let chunks = batch_values(set, *max_values);
            if chunks.is_empty() {
                return Ok(vec![]);
            }
            batches.insert(*source, chunks);
        }

        // odometer over the batches of each slot
        let mut positions = vec![0usize; slots.len()];
        let mut out = Vec::new();
        loop {
            let chosen: BTreeMap<u32, &Vec<ScalarValue>> = slots
                .iter()
                .zip(&positions)
                .filter_map(|(slot, i)| batches.get(slot).and_then(|b| b.get(*i)).map(|b| (*slot, b)))
                .collect();
            out.push(self.render_with(&chosen));

            let mut digit = slots.len();
            loop {
                if digit == 0 {
                    return Ok(out);
                }
                digit -= 1;
                let len = batches.get(&slots[digit]).map_or(0, Vec::len);
                positions[digit] += 1;
                if positions[digit] < len {
                    break;
                }
                positions[digit] = 0;
            }
        }
    }

    fn render_with(&self, chosen: &BTreeMap<u32, &Vec<ScalarValue>>) -> String {
        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                CommandSegment::Text(text) => sql.push_str(text),
                CommandSegment::Slot {
                    source, expr_sql, ..
                } => {
                    let list = chosen
                        .get(source)
                        .map(|values| {
                            values
                                .iter()
                                .map(ScalarValue::to_sql)
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                        .unwrap_or_default();
                    sql.push_str(&format!("{expr_sql} IN ({list})"));
                }
                CommandSegment::Param(_) => sql.push('?'),
            }
        }
        sql
    }
}

impl fmt::Display for AtomicCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.model, self.sql)
    }
}

/// Distinct non-null values in first-seen order, chunked into batches of at
/// most `max_values`.
pub fn batch_values(values: &[ScalarValue], max_values: usize) -> Vec<Vec<ScalarValue>> {
    let mut seen = AHashSet::new();
    let distinct: Vec<ScalarValue> = values
        .iter()
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert((*v).clone()))
        .cloned()
        .collect();
    distinct
        .chunks(max_values.max(1))
        .map(<[ScalarValue]>::to_vec)
        .collect()
}
