//! # Position Allocator
//!
//! Computes sibling ordering keys for drag-and-drop and context-menu inserts
//! without renumbering the other siblings.
//!
//! - between two siblings: midpoint of their positions
//! - at the start: first position - 1
//! - at the end: last position + 1
//!
//! Repeated inserts at the same boundary eventually exhaust `f64` precision.
//! Neighbours closer than one unit-scale epsilon (`f64::EPSILON * max(|a|, |b|, 1)`)
//! count as exhausted, as does a candidate equal to a neighbour. The sibling
//! list is then renumbered with integer spacing (`0, step, 2 * step, ...`) and
//! the computation retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeId;

/// Where a node goes in a sibling list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "at", content = "reference", rename_all = "camelCase")]
pub enum InsertionTarget {
    Start,
    End,
    Before(NodeId),
    After(NodeId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    /// No representable position strictly between the neighbours
    #[error("No position left between {lower} and {upper}")]
    Exhausted { lower: f64, upper: f64 },

    #[error("Unknown sibling: {0}")]
    UnknownSibling(NodeId),
}

/// Result of a placement: the new position plus any renumbered siblings
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub position: f64,
    /// `(sibling id, new position)`, empty unless the list was renumbered
    pub renumbered: Vec<(NodeId, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    step: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new(1000.0)
    }
}

impl PositionAllocator {
    pub fn new(step: f64) -> Self {
        let step = if step.is_finite() && step > 0.0 { step } else { 1000.0 };
        Self { step }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Position for `target` in `siblings` (ordered, excluding the placed node)
    pub fn place(
        &self,
        siblings: &[(NodeId, f64)],
        target: &InsertionTarget,
    ) -> Result<Placement, PositionError> {
        match candidate(siblings, target) {
            Ok(position) => Ok(Placement {
                position,
                renumbered: Vec::new(),
            }),
            Err(PositionError::Exhausted { lower, upper }) => {
                tracing::debug!(lower, upper, "position exhausted, renumbering siblings");
                let renumbered = self.renumber(siblings);
                let position = candidate(&renumbered, target)?;
                Ok(Placement {
                    position,
                    renumbered,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Integer-spaced positions for the whole list, order preserved
    pub fn renumber(&self, siblings: &[(NodeId, f64)]) -> Vec<(NodeId, f64)> {
        siblings
            .iter()
            .enumerate()
            .map(|(index, (id, _))| (id.clone(), index as f64 * self.step))
            .collect()
    }
}

/// Midpoint computation without any renumbering
pub fn candidate(siblings: &[(NodeId, f64)], target: &InsertionTarget) -> Result<f64, PositionError> {
    let index_of = |id: &str| {
        siblings
            .iter()
            .position(|(sibling, _)| sibling == id)
            .ok_or_else(|| PositionError::UnknownSibling(id.to_string()))
    };

    let (lower, upper) = match target {
        InsertionTarget::Start => (None, siblings.first().map(|(_, p)| *p)),
        InsertionTarget::End => (siblings.last().map(|(_, p)| *p), None),
        InsertionTarget::Before(id) => {
            let index = index_of(id)?;
            let lower = index.checked_sub(1).map(|i| siblings[i].1);
            (lower, Some(siblings[index].1))
        }
        InsertionTarget::After(id) => {
            let index = index_of(id)?;
            (Some(siblings[index].1), siblings.get(index + 1).map(|(_, p)| *p))
        }
    };

    let position = match (lower, upper) {
        (None, None) => 0.0,
        (Some(lower), None) => lower + 1.0,
        (None, Some(upper)) => upper - 1.0,
        (Some(lower), Some(upper)) => (lower + upper) / 2.0,
    };

    let above_lower = lower.map_or(true, |lower| position > lower);
    let below_upper = upper.map_or(true, |upper| position < upper);
    let wide_enough = match (lower, upper) {
        (Some(lower), Some(upper)) => {
            upper - lower > f64::EPSILON * lower.abs().max(upper.abs()).max(1.0)
        }
        _ => true,
    };
    if above_lower && below_upper && wide_enough && position.is_finite() {
        Ok(position)
    } else {
        Err(PositionError::Exhausted {
            lower: lower.unwrap_or(f64::NEG_INFINITY),
            upper: upper.unwrap_or(f64::INFINITY),
        })
    }
}
