//! The action log: a backward-linked chain of action records plus a
//! redo stack that survives divergent edits.
//!
//! Every mutating command appends one [`ActionRecord`]; `undo` moves the
//! head back and parks the undone action on the redo stack; `redo` picks
//! an alternative back off. A mutating command issued while the redo
//! stack is non-empty does not discard it; the new action joins the
//! stack head as a sibling alternative, anchored at the position both
//! lines diverge from.

use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::scratch::{ScratchStore, ACTION_LOG_HEAD, REDO_STACK_HEAD};
use crate::transaction::Transaction;
use crate::types::{ActionRecord, RedoRecord};

/// Reads the action-log head.
pub fn head(scratch: &ScratchStore) -> Result<Option<ObjectId>> {
    scratch.get_id(ACTION_LOG_HEAD)
}

/// Walks the log head-first, verifying the chain is gap-free.
///
/// # Errors
///
/// `CorruptLog` when a record's `prev` does not resolve.
pub fn entries(
    store: &ObjectStore,
    from: Option<ObjectId>,
    limit: usize,
) -> Result<Vec<(ObjectId, ActionRecord)>> {
    let mut out = Vec::new();
    let mut current = from;

    while let Some(id) = current {
        if out.len() >= limit {
            break;
        }
        let record: ActionRecord = store.get_typed(id).map_err(|e| match e {
            VexError::NotFound(_) => {
                VexError::CorruptLog(format!("missing record {}", id.as_hex()))
            }
            other => other,
        })?;
        current = record.prev;
        out.push((id, record));
    }

    Ok(out)
}

/// The redo alternatives available at the current position, oldest
/// line first, paired with their action records.
pub fn redo_alternatives(
    store: &ObjectStore,
    scratch: &ScratchStore,
) -> Result<Vec<(ObjectId, ActionRecord)>> {
    let Some(redo_id) = scratch.get_id(REDO_STACK_HEAD)? else {
        return Ok(vec![]);
    };
    let record: RedoRecord = store.get_typed(redo_id)?;

    let mut out = Vec::with_capacity(record.alternatives.len());
    for action_id in record.alternatives {
        let action: ActionRecord = store.get_typed(action_id)?;
        out.push((action_id, action));
    }
    Ok(out)
}

/// Plans the redo-stack and head updates for undoing `undone`.
///
/// When the stack head is already anchored at the position we return to,
/// the undone action merges into its alternatives; otherwise a fresh
/// node is pushed.
pub fn plan_undo(
    txn: &mut Transaction<'_>,
    undone: ObjectId,
    undone_prev: Option<ObjectId>,
) -> Result<()> {
    let old_head = txn.pointer_id(REDO_STACK_HEAD)?;

    let node = match old_head {
        Some(head_id) => {
            let head: RedoRecord = txn.get_typed(head_id)?;
            if head.anchor == undone_prev {
                let mut alternatives = head.alternatives;
                if !alternatives.contains(&undone) {
                    alternatives.push(undone);
                }
                RedoRecord {
                    anchor: undone_prev,
                    alternatives,
                    prev: head.prev,
                }
            } else {
                RedoRecord {
                    anchor: undone_prev,
                    alternatives: vec![undone],
                    prev: Some(head_id),
                }
            }
        }
        None => RedoRecord {
            anchor: undone_prev,
            alternatives: vec![undone],
            prev: None,
        },
    };

    let node_id = txn.put_typed(&node)?;
    txn.set_pointer(REDO_STACK_HEAD, Some(node_id.as_hex()));
    txn.set_pointer(
        ACTION_LOG_HEAD,
        undone_prev.map(|id| id.as_hex()),
    );
    Ok(())
}

/// Plans the redo-stack update for a new action taken while the stack is
/// non-empty: the new action becomes a sibling alternative instead of
/// discarding the redoable line(s).
pub fn plan_branching(txn: &mut Transaction<'_>, new_action: ObjectId) -> Result<()> {
    let Some(head_id) = txn.pointer_id(REDO_STACK_HEAD)? else {
        return Ok(());
    };
    // The position the lines diverge from is the pre-action head.
    let divergence = match txn.snapshot_value(ACTION_LOG_HEAD) {
        Some(value) => Some(ObjectId::from_hex(&value)?),
        None => None,
    };

    let head: RedoRecord = txn.get_typed(head_id)?;
    let node = if head.anchor == divergence {
        let mut alternatives = head.alternatives;
        if !alternatives.contains(&new_action) {
            alternatives.push(new_action);
        }
        RedoRecord {
            anchor: divergence,
            alternatives,
            prev: head.prev,
        }
    } else {
        RedoRecord {
            anchor: divergence,
            alternatives: vec![new_action],
            prev: Some(head_id),
        }
    };

    let node_id = txn.put_typed(&node)?;
    txn.set_pointer(REDO_STACK_HEAD, Some(node_id.as_hex()));
    Ok(())
}

/// Plans the consumption of one redo alternative. Remaining siblings stay
/// available; an emptied node pops to its predecessor.
pub fn plan_consume(txn: &mut Transaction<'_>, node: &RedoRecord, chosen: ObjectId) -> Result<()> {
    let remaining: Vec<ObjectId> = node
        .alternatives
        .iter()
        .copied()
        .filter(|id| *id != chosen)
        .collect();

    if remaining.is_empty() {
        txn.set_pointer(REDO_STACK_HEAD, node.prev.map(|id| id.as_hex()));
    } else {
        let replacement = RedoRecord {
            anchor: node.anchor,
            alternatives: remaining,
            prev: node.prev,
        };
        let replacement_id = txn.put_typed(&replacement)?;
        txn.set_pointer(REDO_STACK_HEAD, Some(replacement_id.as_hex()));
    }
    Ok(())
}
