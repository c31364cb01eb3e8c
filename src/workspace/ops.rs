//! Pure workspace mutations.
//!
//! Every operation here touches only the domain tree. Widget surgery and
//! WebView lifecycle stay in the coordinator, which calls these first and
//! reshapes the UI from the returned outcome.

use thiserror::Error;

use super::{
    Direction, NodeId, NodeKind, Pane, PaneId, PaneNode, Slot, SplitDirection, Workspace,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpError {
    #[error("pane not found: {0}")]
    PaneNotFound(String),

    #[error("cannot close the last pane")]
    LastPane,

    #[error("nothing to resize")]
    NothingToResize,

    #[error("invariant: {0}")]
    Invariant(String),
}

/// Clamp a split ratio so neither side falls under `min_pane_percent`.
pub fn clamp_ratio(ratio: f64, min_pane_percent: f64) -> f64 {
    ratio.clamp(min_pane_percent, 1.0 - min_pane_percent)
}

#[derive(Debug)]
pub struct SplitOutcome {
    pub new_pane_id: PaneId,
    pub split_node_id: NodeId,
    pub ratio: f64,
    /// Node the split wrapped: the leaf itself, or its enclosing stack.
    pub wrapped_node_id: NodeId,
    pub wrapped_stack: bool,
}

/// Split around `target_pane`, putting a fresh pane at `new_uri` on the
/// `direction` side. A pane inside a stack splits around the whole stack
/// container so the stack stays intact.
pub fn split_pane(
    ws: &mut Workspace,
    target_pane: &str,
    direction: Direction,
    new_uri: &str,
    ratio: f64,
    min_pane_percent: f64,
) -> Result<SplitOutcome, OpError> {
    let node = ws
        .node(target_pane)
        .ok_or_else(|| OpError::PaneNotFound(target_pane.to_string()))?;
    if !node.is_leaf() {
        return Err(OpError::Invariant(format!(
            "split target {} is not a leaf",
            target_pane
        )));
    }

    // Resolve what the split actually wraps.
    let parent_id = node.parent.clone();
    let (wrap_id, wrapped_stack) = match parent_id.as_deref().and_then(|p| ws.node(p)) {
        Some(parent) if parent.is_stack() => (parent.id.clone(), true),
        _ => (target_pane.to_string(), false),
    };
    let outer_parent = ws
        .node(&wrap_id)
        .and_then(|n| n.parent.clone());

    let new_pane = Pane::new(new_uri);
    let new_pane_id = new_pane.id.clone();
    let split_id = super::new_id();
    let ratio = clamp_ratio(ratio, min_pane_percent);

    let children = if direction.is_forward() {
        [wrap_id.clone(), new_pane_id.clone()]
    } else {
        [new_pane_id.clone(), wrap_id.clone()]
    };

    let mut leaf = PaneNode::leaf(new_pane);
    leaf.parent = Some(split_id.clone());
    ws.insert_node(leaf);

    ws.insert_node(PaneNode {
        id: split_id.clone(),
        parent: outer_parent.clone(),
        kind: NodeKind::Split {
            direction: direction.split_direction(),
            ratio,
            children,
        },
    });

    if let Some(wrapped) = ws.node_mut(&wrap_id) {
        wrapped.parent = Some(split_id.clone());
    }

    match outer_parent {
        Some(parent_id) => replace_child(ws, &parent_id, &wrap_id, &split_id)?,
        None => ws.set_root(split_id.clone()),
    }

    Ok(SplitOutcome {
        new_pane_id,
        split_node_id: split_id,
        ratio,
        wrapped_node_id: wrap_id,
        wrapped_stack,
    })
}

fn replace_child(
    ws: &mut Workspace,
    parent_id: &str,
    old: &str,
    new: &str,
) -> Result<(), OpError> {
    let parent = ws
        .node_mut(parent_id)
        .ok_or_else(|| OpError::Invariant(format!("parent {} missing", parent_id)))?;
    match &mut parent.kind {
        NodeKind::Split { children, .. } => {
            let slot = children
                .iter()
                .position(|c| c == old)
                .ok_or_else(|| {
                    OpError::Invariant(format!("{} not under claimed parent {}", old, parent_id))
                })?;
            children[slot] = new.to_string();
            Ok(())
        }
        _ => Err(OpError::Invariant(format!(
            "parent {} is not a split",
            parent_id
        ))),
    }
}

/// Everything the incremental close path needs, captured while the tree is
/// still consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseContext {
    /// Closing pane sits in a stack at `index`.
    Stacked { stack_id: NodeId, index: usize },
    /// Closing pane is one side of a split.
    Split {
        parent_id: NodeId,
        sibling_id: NodeId,
        sibling_slot: Slot,
        /// Grandparent split and the slot the parent occupies in it, when
        /// the parent is not the root.
        grandparent: Option<(NodeId, Slot)>,
    },
    /// Closing pane is the root; the caller handles last-pane policy.
    Root,
}

/// Derive the close context for `pane_id`, or a precheck reason naming the
/// violated invariant (which drives the fallback to full rebuild).
pub fn derive_close_context(ws: &Workspace, pane_id: &str) -> Result<CloseContext, String> {
    let node = ws
        .node(pane_id)
        .ok_or_else(|| format!("closing pane {} not found", pane_id))?;
    if !node.is_leaf() {
        return Err(format!("closing node {} is not a leaf", pane_id));
    }
    let Some(parent_id) = node.parent.clone() else {
        return Ok(CloseContext::Root);
    };
    let parent = ws
        .node(&parent_id)
        .ok_or_else(|| format!("parent {} missing", parent_id))?;

    match &parent.kind {
        NodeKind::Stack { children, .. } => {
            let index = children
                .iter()
                .position(|c| c == pane_id)
                .ok_or_else(|| format!("pane {} not under claimed stack {}", pane_id, parent_id))?;
            Ok(CloseContext::Stacked {
                stack_id: parent_id,
                index,
            })
        }
        NodeKind::Split { children, .. } => {
            let closing_slot = children
                .iter()
                .position(|c| c == pane_id)
                .ok_or_else(|| format!("pane {} not under claimed parent {}", pane_id, parent_id))?;
            let sibling_id = children[1 - closing_slot].clone();
            if ws.node(&sibling_id).is_none() {
                return Err(format!("split {} has nil child", parent_id));
            }
            let sibling_slot = if closing_slot == 0 { Slot::End } else { Slot::Start };

            let grandparent = match parent.parent.clone() {
                None => None,
                Some(gp_id) => {
                    let gp = ws
                        .node(&gp_id)
                        .ok_or_else(|| format!("grandparent {} missing", gp_id))?;
                    match &gp.kind {
                        NodeKind::Split { children, .. } => {
                            let parent_slot = children
                                .iter()
                                .position(|c| c == &parent_id)
                                .ok_or_else(|| {
                                    format!("parent {} not under grandparent {}", parent_id, gp_id)
                                })?;
                            let slot = if parent_slot == 0 { Slot::Start } else { Slot::End };
                            Some((gp_id, slot))
                        }
                        _ => return Err(format!("grandparent {} is not a split", gp_id)),
                    }
                }
            };

            Ok(CloseContext::Split {
                parent_id,
                sibling_id,
                sibling_slot,
                grandparent,
            })
        }
        NodeKind::Leaf(_) => Err(format!("parent {} is a leaf", parent_id)),
    }
}

#[derive(Debug)]
pub struct CloseOutcome {
    pub closed: Pane,
    pub new_active: PaneId,
    pub context: CloseContext,
    /// Stack whose strip changed, with its adjusted active index.
    pub stack_after: Option<(NodeId, usize)>,
}

/// Remove `pane_id` from the tree. Split parents collapse by promoting the
/// sibling; stack parents drop the page, dissolving the stack container
/// when its last page goes.
pub fn close_pane(ws: &mut Workspace, pane_id: &str) -> Result<CloseOutcome, OpError> {
    if ws.pane_count() <= 1 {
        return Err(OpError::LastPane);
    }
    let context = derive_close_context(ws, pane_id).map_err(OpError::Invariant)?;

    match context.clone() {
        CloseContext::Root => Err(OpError::LastPane),
        CloseContext::Stacked { stack_id, index } => {
            let stack_len = match ws.node(&stack_id).map(|n| &n.kind) {
                Some(NodeKind::Stack { children, .. }) => children.len(),
                _ => return Err(OpError::Invariant(format!("stack {} vanished", stack_id))),
            };
            if stack_len >= 2 {
                let closed = detach_from_stack(ws, &stack_id, index)?;
                let (new_active, stack_after) = match ws.node(&stack_id).map(|n| &n.kind) {
                    Some(NodeKind::Stack {
                        children,
                        active_index,
                    }) => (
                        children[*active_index].clone(),
                        Some((stack_id.clone(), *active_index)),
                    ),
                    _ => return Err(OpError::Invariant(format!("stack {} vanished", stack_id))),
                };
                if ws.active_pane_id == pane_id {
                    ws.active_pane_id = new_active.clone();
                }
                Ok(CloseOutcome {
                    closed,
                    new_active,
                    context,
                    stack_after,
                })
            } else {
                // Last page: the stack dissolves and its split sibling is
                // promoted, like closing a split child.
                let closed = ws
                    .remove_node(pane_id)
                    .and_then(|n| n.pane().cloned())
                    .ok_or_else(|| OpError::PaneNotFound(pane_id.to_string()))?;
                let parent_id = ws
                    .node(&stack_id)
                    .and_then(|n| n.parent.clone())
                    .ok_or_else(|| {
                        OpError::Invariant(format!("root stack {} has one pane", stack_id))
                    })?;
                let sibling_id = split_sibling(ws, &parent_id, &stack_id)?;
                ws.remove_node(&stack_id);
                promote_child(ws, &parent_id, &sibling_id)?;

                let new_active = ws
                    .active_leaf_under(&sibling_id)
                    .ok_or_else(|| OpError::Invariant("promoted sibling has no leaf".to_string()))?;
                if ws.active_pane_id == pane_id {
                    ws.active_pane_id = new_active.clone();
                }
                Ok(CloseOutcome {
                    closed,
                    new_active,
                    context,
                    stack_after: None,
                })
            }
        }
        CloseContext::Split {
            parent_id,
            sibling_id,
            ..
        } => {
            let closed = ws
                .remove_node(pane_id)
                .and_then(|n| n.pane().cloned())
                .ok_or_else(|| OpError::PaneNotFound(pane_id.to_string()))?;
            promote_child(ws, &parent_id, &sibling_id)?;

            let new_active = ws
                .active_leaf_under(&sibling_id)
                .ok_or_else(|| OpError::Invariant("promoted sibling has no leaf".to_string()))?;
            if ws.active_pane_id == pane_id {
                ws.active_pane_id = new_active.clone();
            }
            Ok(CloseOutcome {
                closed,
                new_active,
                context,
                stack_after: None,
            })
        }
    }
}

/// The other child of a split.
fn split_sibling(ws: &Workspace, split_id: &str, child: &str) -> Result<NodeId, OpError> {
    match ws.node(split_id).map(|n| &n.kind) {
        Some(NodeKind::Split { children, .. }) => children
            .iter()
            .find(|c| c.as_str() != child)
            .cloned()
            .ok_or_else(|| OpError::Invariant(format!("split {} has nil child", split_id))),
        _ => Err(OpError::Invariant(format!("{} is not a split", split_id))),
    }
}

/// Remove `split_id` from the tree and put `keep` in its place, either in
/// the grandparent's slot or as the new root.
fn promote_child(ws: &mut Workspace, split_id: &str, keep: &str) -> Result<(), OpError> {
    let grandparent = ws.node(split_id).and_then(|n| n.parent.clone());
    ws.remove_node(split_id);
    match grandparent {
        Some(gp_id) => {
            if let Some(node) = ws.node_mut(keep) {
                node.parent = Some(gp_id.clone());
            }
            replace_child(ws, &gp_id, split_id, keep)
        }
        None => {
            if let Some(node) = ws.node_mut(keep) {
                node.parent = None;
            }
            ws.set_root(keep.to_string());
            Ok(())
        }
    }
}

/// Remove the child at `index` from a stack, clamping the active index.
/// A stack keeps existing even with a single remaining page.
fn detach_from_stack(
    ws: &mut Workspace,
    stack_id: &str,
    index: usize,
) -> Result<Pane, OpError> {
    let child_id = {
        let node = ws
            .node_mut(stack_id)
            .ok_or_else(|| OpError::Invariant(format!("stack {} missing", stack_id)))?;
        let NodeKind::Stack {
            children,
            active_index,
        } = &mut node.kind
        else {
            return Err(OpError::Invariant(format!("{} is not a stack", stack_id)));
        };
        if index >= children.len() {
            return Err(OpError::Invariant(format!(
                "stack {} index {} out of range",
                stack_id, index
            )));
        }
        if children.len() == 1 {
            return Err(OpError::Invariant(format!(
                "cannot detach last child of stack {}",
                stack_id
            )));
        }
        let child_id = children.remove(index);
        if *active_index > index || *active_index >= children.len() {
            *active_index = active_index.saturating_sub(1);
        }
        child_id
    };

    ws.remove_node(&child_id)
        .and_then(|n| n.pane().cloned())
        .ok_or_else(|| OpError::PaneNotFound(child_id))
}

#[derive(Debug)]
pub struct StackOutcome {
    pub stack_node_id: NodeId,
    pub new_pane_id: PaneId,
}

/// Convert a plain leaf into a stack container holding the original pane
/// and one fresh pane, which becomes the active page.
pub fn create_stack(
    ws: &mut Workspace,
    target_pane: &str,
    new_uri: &str,
) -> Result<StackOutcome, OpError> {
    let node = ws
        .node(target_pane)
        .ok_or_else(|| OpError::PaneNotFound(target_pane.to_string()))?;
    if !node.is_leaf() {
        return Err(OpError::Invariant(format!(
            "stack target {} is not a leaf",
            target_pane
        )));
    }
    let outer_parent = node.parent.clone();
    if let Some(parent) = outer_parent.as_deref().and_then(|p| ws.node(p)) {
        if parent.is_stack() {
            return Err(OpError::Invariant(format!(
                "pane {} is already stacked",
                target_pane
            )));
        }
    }

    let stack_id = super::new_id();
    let new_pane = Pane::new(new_uri);
    let new_pane_id = new_pane.id.clone();

    let mut leaf = PaneNode::leaf(new_pane);
    leaf.parent = Some(stack_id.clone());
    ws.insert_node(leaf);

    ws.insert_node(PaneNode {
        id: stack_id.clone(),
        parent: outer_parent.clone(),
        kind: NodeKind::Stack {
            children: vec![target_pane.to_string(), new_pane_id.clone()],
            active_index: 1,
        },
    });

    if let Some(target) = ws.node_mut(target_pane) {
        target.parent = Some(stack_id.clone());
    }

    match outer_parent {
        Some(parent_id) => replace_child(ws, &parent_id, target_pane, &stack_id)?,
        None => ws.set_root(stack_id.clone()),
    }

    Ok(StackOutcome {
        stack_node_id: stack_id,
        new_pane_id,
    })
}

/// Append a fresh pane to an existing stack and make it the active page.
pub fn add_to_stack(
    ws: &mut Workspace,
    stack_id: &str,
    new_uri: &str,
) -> Result<PaneId, OpError> {
    if !ws.node(stack_id).map(|n| n.is_stack()).unwrap_or(false) {
        return Err(OpError::Invariant(format!("{} is not a stack", stack_id)));
    }

    let new_pane = Pane::new(new_uri);
    let new_pane_id = new_pane.id.clone();
    let mut leaf = PaneNode::leaf(new_pane);
    leaf.parent = Some(stack_id.to_string());
    ws.insert_node(leaf);

    if let Some(node) = ws.node_mut(stack_id) {
        if let NodeKind::Stack {
            children,
            active_index,
        } = &mut node.kind
        {
            children.push(new_pane_id.clone());
            *active_index = children.len() - 1;
        }
    }
    Ok(new_pane_id)
}

/// Move an existing detached leaf into a stack. Used by consume.
fn append_leaf_to_stack(ws: &mut Workspace, stack_id: &str, leaf_id: &str) {
    if let Some(leaf) = ws.node_mut(leaf_id) {
        leaf.parent = Some(stack_id.to_string());
    }
    if let Some(node) = ws.node_mut(stack_id) {
        if let NodeKind::Stack { children, .. } = &mut node.kind {
            children.push(leaf_id.to_string());
        }
    }
}

/// Set the active page of a stack.
pub fn set_stack_active(ws: &mut Workspace, stack_id: &str, index: usize) -> Result<PaneId, OpError> {
    let node = ws
        .node_mut(stack_id)
        .ok_or_else(|| OpError::Invariant(format!("stack {} missing", stack_id)))?;
    let NodeKind::Stack {
        children,
        active_index,
    } = &mut node.kind
    else {
        return Err(OpError::Invariant(format!("{} is not a stack", stack_id)));
    };
    if index >= children.len() {
        return Err(OpError::Invariant(format!(
            "stack {} index {} out of range",
            stack_id, index
        )));
    }
    *active_index = index;
    let pane_id = children[index].clone();
    ws.active_pane_id = pane_id.clone();
    Ok(pane_id)
}

/// Persist a divider ratio dragged in the UI.
pub fn set_split_ratio(
    ws: &mut Workspace,
    split_id: &str,
    ratio: f64,
    min_pane_percent: f64,
) -> Result<f64, OpError> {
    let node = ws
        .node_mut(split_id)
        .ok_or_else(|| OpError::Invariant(format!("split {} missing", split_id)))?;
    let NodeKind::Split { ratio: stored, .. } = &mut node.kind else {
        return Err(OpError::Invariant(format!("{} is not a split", split_id)));
    };
    let clamped = clamp_ratio(ratio, min_pane_percent);
    *stored = clamped;
    Ok(clamped)
}

/// Adjust the nearest split boundary above the active pane in the pane's
/// favor (`grow`) or against it.
pub fn resize_active_pane(
    ws: &mut Workspace,
    grow: bool,
    step_percent: f64,
    min_pane_percent: f64,
) -> Result<(NodeId, f64), OpError> {
    let active = ws.active_pane_id.clone();
    if ws.node(&active).is_none() {
        return Err(OpError::PaneNotFound(active));
    }

    // Nearest split ancestor and which side of it we came from.
    let mut current = active;
    let (split_id, from_start) = loop {
        let parent_id = match ws.node(&current).and_then(|n| n.parent.clone()) {
            Some(p) => p,
            None => return Err(OpError::NothingToResize),
        };
        match ws.node(&parent_id).map(|n| &n.kind) {
            Some(NodeKind::Split { children, .. }) => {
                break (parent_id.clone(), children[0] == current);
            }
            _ => current = parent_id,
        }
    };

    let delta = if grow == from_start {
        step_percent
    } else {
        -step_percent
    };
    let current_ratio = match ws.node(&split_id).map(|n| &n.kind) {
        Some(NodeKind::Split { ratio, .. }) => *ratio,
        _ => return Err(OpError::NothingToResize),
    };
    let new_ratio = set_split_ratio(ws, &split_id, current_ratio + delta, min_pane_percent)?;
    Ok((split_id, new_ratio))
}

/// Nearest leaf in the tree along `direction` from `pane_id`, by walking
/// up to the first matching-axis split that allows movement and descending
/// the entry side.
pub fn structural_neighbor(
    ws: &Workspace,
    pane_id: &str,
    direction: Direction,
) -> Option<PaneId> {
    let node = ws.node(pane_id)?;
    // Movement out of a stack starts from the stack container.
    let mut current = match node.parent.as_deref().and_then(|p| ws.node(p)) {
        Some(parent) if parent.is_stack() => parent.id.clone(),
        _ => pane_id.to_string(),
    };

    loop {
        let parent_id = ws.node(&current)?.parent.clone()?;
        if let Some(NodeKind::Split {
            direction: split_dir,
            children,
            ..
        }) = ws.node(&parent_id).map(|n| &n.kind)
        {
            if *split_dir == direction.split_direction() {
                let at_start = children[0] == current;
                let target = if direction.is_forward() && at_start {
                    Some(children[1].clone())
                } else if !direction.is_forward() && !at_start {
                    Some(children[0].clone())
                } else {
                    None
                };
                if let Some(target) = target {
                    return entry_leaf(ws, &target, direction);
                }
            }
        }
        current = parent_id;
    }
}

/// Descend into `node_id` choosing the leaf nearest to the travelling
/// direction's entry edge.
fn entry_leaf(ws: &Workspace, node_id: &str, direction: Direction) -> Option<PaneId> {
    match ws.node(node_id).map(|n| &n.kind)? {
        NodeKind::Leaf(pane) => Some(pane.id.clone()),
        NodeKind::Stack {
            children,
            active_index,
        } => children.get(*active_index).cloned(),
        NodeKind::Split {
            direction: split_dir,
            children,
            ..
        } => {
            let next = if *split_dir == direction.split_direction() {
                // Entering along the split axis: take the side closest to
                // where we came from.
                if direction.is_forward() {
                    children[0].clone()
                } else {
                    children[1].clone()
                }
            } else {
                children[0].clone()
            };
            entry_leaf(ws, &next, direction)
        }
    }
}

#[derive(Debug)]
pub struct ConsumeOutcome {
    pub stack_node_id: NodeId,
    pub moved_pane_id: PaneId,
}

/// Pull the adjacent pane in `direction` into the active pane's stack,
/// creating the stack if the active pane is a plain leaf. Returns a
/// user-facing message on failure.
pub fn consume_pane(
    ws: &mut Workspace,
    direction: Direction,
) -> Result<ConsumeOutcome, String> {
    let active = ws.active_pane_id.clone();
    let neighbor = structural_neighbor(ws, &active, direction)
        .ok_or_else(|| "No pane to consume".to_string())?;

    detach_leaf(ws, &neighbor).map_err(|e| e.to_string())?;

    // The active pane's surroundings may have changed during the detach;
    // resolve its stack (or build one) afterwards.
    let stack_id = match ws
        .node(&active)
        .and_then(|n| n.parent.clone())
        .and_then(|p| ws.node(&p).map(|n| (p.clone(), n.is_stack())))
    {
        Some((parent_id, true)) => parent_id,
        _ => convert_leaf_to_stack(ws, &active).map_err(|e| e.to_string())?,
    };

    append_leaf_to_stack(ws, &stack_id, &neighbor);

    // Keep the active pane the visible page.
    if let Some(NodeKind::Stack {
        children,
        active_index,
    }) = ws.node_mut(&stack_id).map(|n| &mut n.kind)
    {
        if let Some(idx) = children.iter().position(|c| c == &active) {
            *active_index = idx;
        }
    }

    Ok(ConsumeOutcome {
        stack_node_id: stack_id,
        moved_pane_id: neighbor,
    })
}

#[derive(Debug)]
pub struct ExpelOutcome {
    pub split_node_id: NodeId,
    pub stack_node_id: NodeId,
}

/// Push the active pane out of its stack into a split beside it. Returns
/// a user-facing message when the pane is not stacked.
pub fn expel_pane(ws: &mut Workspace, min_pane_percent: f64) -> Result<ExpelOutcome, String> {
    let active = ws.active_pane_id.clone();
    let stack_id = match ws
        .node(&active)
        .and_then(|n| n.parent.clone())
        .filter(|p| ws.node(p).map(|n| n.is_stack()).unwrap_or(false))
    {
        Some(stack_id) => stack_id,
        None => return Err("Nothing to expel".to_string()),
    };

    let index = match ws.node(&stack_id).map(|n| &n.kind) {
        Some(NodeKind::Stack { children, .. }) => {
            if children.len() < 2 {
                return Err("Nothing to expel".to_string());
            }
            children.iter().position(|c| c == &active).unwrap_or(0)
        }
        _ => return Err("Nothing to expel".to_string()),
    };

    // Take the pane out of the strip without dropping its node.
    if let Some(NodeKind::Stack {
        children,
        active_index,
    }) = ws.node_mut(&stack_id).map(|n| &mut n.kind)
    {
        children.remove(index);
        if *active_index > index || *active_index >= children.len() {
            *active_index = active_index.saturating_sub(1);
        }
    }

    let outer_parent = ws.node(&stack_id).and_then(|n| n.parent.clone());
    let split_id = super::new_id();

    ws.insert_node(PaneNode {
        id: split_id.clone(),
        parent: outer_parent.clone(),
        kind: NodeKind::Split {
            direction: SplitDirection::Horizontal,
            ratio: clamp_ratio(0.5, min_pane_percent),
            children: [stack_id.clone(), active.clone()],
        },
    });
    if let Some(stack) = ws.node_mut(&stack_id) {
        stack.parent = Some(split_id.clone());
    }
    if let Some(leaf) = ws.node_mut(&active) {
        leaf.parent = Some(split_id.clone());
    }
    match outer_parent {
        Some(parent_id) => {
            replace_child(ws, &parent_id, &stack_id, &split_id).map_err(|e| e.to_string())?
        }
        None => ws.set_root(split_id.clone()),
    }

    Ok(ExpelOutcome {
        split_node_id: split_id,
        stack_node_id: stack_id,
    })
}

/// Remove a leaf from the tree without dropping its node, collapsing a
/// split parent by promoting the sibling.
fn detach_leaf(ws: &mut Workspace, leaf_id: &str) -> Result<(), OpError> {
    let context = derive_close_context(ws, leaf_id).map_err(OpError::Invariant)?;
    match context {
        CloseContext::Root => Err(OpError::Invariant(format!(
            "cannot detach root leaf {}",
            leaf_id
        ))),
        CloseContext::Stacked { stack_id, index } => {
            let stack_len = match ws.node(&stack_id).map(|n| &n.kind) {
                Some(NodeKind::Stack { children, .. }) => children.len(),
                _ => 0,
            };
            if stack_len >= 2 {
                if let Some(NodeKind::Stack {
                    children,
                    active_index,
                }) = ws.node_mut(&stack_id).map(|n| &mut n.kind)
                {
                    children.remove(index);
                    if *active_index > index || *active_index >= children.len() {
                        *active_index = active_index.saturating_sub(1);
                    }
                }
            } else {
                // Sole page: take the whole stack out with it.
                let parent_id = ws
                    .node(&stack_id)
                    .and_then(|n| n.parent.clone())
                    .ok_or_else(|| {
                        OpError::Invariant(format!("cannot detach root stack {}", stack_id))
                    })?;
                let sibling_id = split_sibling(ws, &parent_id, &stack_id)?;
                ws.remove_node(&stack_id);
                promote_child(ws, &parent_id, &sibling_id)?;
            }
            if let Some(node) = ws.node_mut(leaf_id) {
                node.parent = None;
            }
            Ok(())
        }
        CloseContext::Split {
            parent_id,
            sibling_id,
            ..
        } => {
            promote_child(ws, &parent_id, &sibling_id)?;
            if let Some(node) = ws.node_mut(leaf_id) {
                node.parent = None;
            }
            Ok(())
        }
    }
}

/// Wrap a detached-or-parented leaf in a new single-page stack in place.
fn convert_leaf_to_stack(ws: &mut Workspace, leaf_id: &str) -> Result<NodeId, OpError> {
    let outer_parent = ws
        .node(leaf_id)
        .ok_or_else(|| OpError::PaneNotFound(leaf_id.to_string()))?
        .parent
        .clone();
    let stack_id = super::new_id();
    ws.insert_node(PaneNode {
        id: stack_id.clone(),
        parent: outer_parent.clone(),
        kind: NodeKind::Stack {
            children: vec![leaf_id.to_string()],
            active_index: 0,
        },
    });
    if let Some(leaf) = ws.node_mut(leaf_id) {
        leaf.parent = Some(stack_id.clone());
    }
    match outer_parent {
        Some(parent_id) => replace_child(ws, &parent_id, leaf_id, &stack_id)?,
        None => ws.set_root(stack_id.clone()),
    }
    Ok(stack_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    fn min() -> f64 {
        0.1
    }

    #[test]
    fn test_split_root_right() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();

        let out = split_pane(&mut ws, &p0, Direction::Right, "about:blank", 0.5, min()).unwrap();
        ws.active_pane_id = out.new_pane_id.clone();

        ws.check_invariants().unwrap();
        assert_eq!(ws.pane_count(), 2);
        let root = ws.node(ws.root_id()).unwrap();
        let NodeKind::Split {
            direction,
            ratio,
            children,
        } = &root.kind
        else {
            panic!("root should be a split");
        };
        assert_eq!(*direction, SplitDirection::Horizontal);
        assert_eq!(*ratio, 0.5);
        assert_eq!(children[0], p0);
        assert_eq!(children[1], out.new_pane_id);
    }

    #[test]
    fn test_split_left_puts_new_pane_first() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let out = split_pane(&mut ws, &p0, Direction::Left, "about:blank", 0.5, min()).unwrap();
        let NodeKind::Split { children, .. } = &ws.node(ws.root_id()).unwrap().kind else {
            panic!("root should be a split");
        };
        assert_eq!(children[0], out.new_pane_id);
        assert_eq!(children[1], p0);
    }

    #[test]
    fn test_split_ratio_clamped() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let out = split_pane(&mut ws, &p0, Direction::Down, "about:blank", 0.99, min()).unwrap();
        assert_eq!(out.ratio, 0.9);
    }

    #[test]
    fn test_split_inside_stack_wraps_container() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let stack = create_stack(&mut ws, &p0, "about:blank").unwrap();

        let out = split_pane(
            &mut ws,
            &p0,
            Direction::Right,
            "about:blank",
            0.5,
            min(),
        )
        .unwrap();
        assert!(out.wrapped_stack);
        assert_eq!(out.wrapped_node_id, stack.stack_node_id);

        ws.check_invariants().unwrap();
        // Stack stays intact under the new split.
        let NodeKind::Split { children, .. } = &ws.node(ws.root_id()).unwrap().kind else {
            panic!("root should be a split");
        };
        assert_eq!(children[0], stack.stack_node_id);
    }

    #[test]
    fn test_close_promotes_sibling_to_root() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let out = split_pane(&mut ws, &p0, Direction::Right, "about:blank", 0.5, min()).unwrap();
        ws.active_pane_id = out.new_pane_id.clone();

        let closed = close_pane(&mut ws, &out.new_pane_id).unwrap();
        ws.check_invariants().unwrap();
        assert_eq!(ws.root_id(), &p0);
        assert_eq!(ws.active_pane_id, p0);
        assert_eq!(closed.new_active, p0);
        assert_eq!(ws.pane_count(), 1);
    }

    #[test]
    fn test_close_into_grandparent_slot() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let first = split_pane(&mut ws, &p0, Direction::Right, "b", 0.5, min()).unwrap();
        let p1 = first.new_pane_id.clone();
        ws.active_pane_id = p1.clone();
        let second = split_pane(&mut ws, &p1, Direction::Down, "c", 0.5, min()).unwrap();
        let p2 = second.new_pane_id.clone();
        ws.active_pane_id = p2.clone();

        close_pane(&mut ws, &p2).unwrap();
        ws.check_invariants().unwrap();
        assert_eq!(ws.pane_count(), 2);
        // p1 is promoted into the slot its split held under the root.
        let NodeKind::Split { children, .. } = &ws.node(ws.root_id()).unwrap().kind else {
            panic!("root should remain a split");
        };
        assert_eq!(children[1], p1);
        assert_eq!(ws.active_pane_id, p1);
    }

    #[test]
    fn test_close_last_pane_rejected() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        assert_eq!(close_pane(&mut ws, &p0).unwrap_err(), OpError::LastPane);
    }

    #[test]
    fn test_stack_then_close_middle() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let stack = create_stack(&mut ws, &p0, "about:blank").unwrap();
        let p1 = stack.new_pane_id.clone();
        ws.active_pane_id = p1.clone();
        let p2 = add_to_stack(&mut ws, &stack.stack_node_id, "about:blank").unwrap();
        ws.active_pane_id = p2.clone();

        // Click the middle title bar, then close it.
        set_stack_active(&mut ws, &stack.stack_node_id, 1).unwrap();
        assert_eq!(ws.active_pane_id, p1);
        let out = close_pane(&mut ws, &p1).unwrap();

        ws.check_invariants().unwrap();
        let NodeKind::Stack {
            children,
            active_index,
        } = &ws.node(&stack.stack_node_id).unwrap().kind
        else {
            panic!("stack should survive");
        };
        assert_eq!(children, &vec![p0.clone(), p2.clone()]);
        assert!(*active_index < children.len());
        assert_eq!(out.stack_after, Some((stack.stack_node_id.clone(), *active_index)));
        assert!(ws.contains_pane(&ws.active_pane_id.clone()));
    }

    #[test]
    fn test_close_context_reports_reason() {
        let ws = Workspace::new("https://a.test");
        let err = derive_close_context(&ws, "nope").unwrap_err();
        assert!(err.contains("not found"));

        let p0 = ws.active_pane_id.clone();
        assert_eq!(derive_close_context(&ws, &p0).unwrap(), CloseContext::Root);
    }

    #[test]
    fn test_visible_area_count_stack_counts_once() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let stack = create_stack(&mut ws, &p0, "b").unwrap();
        add_to_stack(&mut ws, &stack.stack_node_id, "c").unwrap();
        assert_eq!(ws.pane_count(), 3);
        assert_eq!(ws.visible_area_count(), 1);

        let first = ws.pane_ids()[0].clone();
        ws.active_pane_id = first.clone();
        split_pane(&mut ws, &first, Direction::Right, "d", 0.5, min()).unwrap();
        assert_eq!(ws.visible_area_count(), 2);
        assert_eq!(ws.pane_count(), 4);
    }

    #[test]
    fn test_resize_root_leaf_has_nothing_to_resize() {
        let mut ws = Workspace::new("https://a.test");
        assert_eq!(
            resize_active_pane(&mut ws, true, 0.05, min()).unwrap_err(),
            OpError::NothingToResize
        );
    }

    #[test]
    fn test_resize_grows_active_side() {
        let mut ws = Workspace::new("https://a.test");
        let p0 = ws.active_pane_id.clone();
        let out = split_pane(&mut ws, &p0, Direction::Right, "b", 0.5, min()).unwrap();

        // Active on the start side: growing raises the ratio.
        ws.active_pane_id = p0.clone();
        let (_, ratio) = resize_active_pane(&mut ws, true, 0.05, min()).unwrap();
        assert!((ratio - 0.55).abs() < 1e-9);

        // Active on the end side: growing lowers it.
        ws.active_pane_id = out.new_pane_id.clone();
        let (_, ratio) = resize_active_pane(&mut ws, true, 0.05, min()).unwrap();
        assert!((ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_structural_neighbor_crosses_axis() {
        let mut ws = Workspace::new("a");
        let p0 = ws.active_pane_id.clone();
        let right = split_pane(&mut ws, &p0, Direction::Right, "b", 0.5, min()).unwrap();
        let p1 = right.new_pane_id.clone();
        ws.active_pane_id = p1.clone();
        let down = split_pane(&mut ws, &p1, Direction::Down, "c", 0.5, min()).unwrap();
        let p2 = down.new_pane_id.clone();

        assert_eq!(structural_neighbor(&ws, &p2, Direction::Left), Some(p0.clone()));
        assert_eq!(structural_neighbor(&ws, &p0, Direction::Right), Some(p1.clone()));
        assert_eq!(structural_neighbor(&ws, &p1, Direction::Down), Some(p2.clone()));
        assert_eq!(structural_neighbor(&ws, &p0, Direction::Left), None);
    }

    #[test]
    fn test_consume_right_into_stack() {
        let mut ws = Workspace::new("a");
        let p0 = ws.active_pane_id.clone();
        let out = split_pane(&mut ws, &p0, Direction::Right, "b", 0.5, min()).unwrap();
        let p1 = out.new_pane_id.clone();
        ws.active_pane_id = p0.clone();

        let consumed = consume_pane(&mut ws, Direction::Right).unwrap();
        ws.check_invariants().unwrap();
        assert_eq!(consumed.moved_pane_id, p1);
        assert_eq!(ws.visible_area_count(), 1);
        assert_eq!(ws.pane_count(), 2);
        assert_eq!(ws.active_pane_id, p0);

        // Active pane remains the visible page of the stack.
        let NodeKind::Stack {
            children,
            active_index,
        } = &ws.node(&consumed.stack_node_id).unwrap().kind
        else {
            panic!("expected stack");
        };
        assert_eq!(children[*active_index], p0);
    }

    #[test]
    fn test_consume_without_neighbor_reports_message() {
        let mut ws = Workspace::new("a");
        assert_eq!(
            consume_pane(&mut ws, Direction::Left).unwrap_err(),
            "No pane to consume"
        );
    }

    #[test]
    fn test_expel_splits_out_of_stack() {
        let mut ws = Workspace::new("a");
        let p0 = ws.active_pane_id.clone();
        let stack = create_stack(&mut ws, &p0, "b").unwrap();
        let p1 = stack.new_pane_id.clone();
        ws.active_pane_id = p1.clone();

        let out = expel_pane(&mut ws, min()).unwrap();
        ws.check_invariants().unwrap();
        assert_eq!(ws.active_pane_id, p1);
        let NodeKind::Split { children, .. } = &ws.node(&out.split_node_id).unwrap().kind else {
            panic!("expected split");
        };
        assert_eq!(children[0], stack.stack_node_id);
        assert_eq!(children[1], p1);
        assert_eq!(ws.visible_area_count(), 2);
    }

    #[test]
    fn test_expel_unstacked_reports_message() {
        let mut ws = Workspace::new("a");
        assert_eq!(expel_pane(&mut ws, min()).unwrap_err(), "Nothing to expel");
    }
}
