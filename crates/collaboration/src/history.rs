/// Branching, bounded undo/redo history
///
/// Each branch keeps a past/future split around the current position. Undo
/// and redo hand back the operations the caller must apply to the live
/// document; the history itself never touches the document. Only locally
/// recorded operations enter history, never remote ones.
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    CollaborationError, HistoryConfig, ListenerRegistry, Operation, Result, Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub uuid::Uuid);

impl StateId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub uuid::Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One undoable checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    pub id: StateId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub label: Option<String>,
    pub operations: Vec<Operation>,
}

impl HistoryState {
    pub fn new(operations: Vec<Operation>, label: Option<String>) -> Self {
        Self {
            id: StateId::new(),
            created_at: chrono::Utc::now(),
            label,
            operations,
        }
    }

    /// Operations that undo this state, last change first.
    pub fn inverse_operations(&self) -> Vec<Operation> {
        self.operations.iter().rev().map(Operation::inverse).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBranch {
    pub id: BranchId,
    pub name: String,
    pub parent_branch_id: Option<BranchId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    past: VecDeque<HistoryState>,

    /// Most recently undone state last
    future: Vec<HistoryState>,
}

impl HistoryBranch {
    fn new(name: impl Into<String>, parent_branch_id: Option<BranchId>) -> Self {
        Self {
            id: BranchId::new(),
            name: name.into(),
            parent_branch_id,
            created_at: chrono::Utc::now(),
            past: VecDeque::new(),
            future: Vec::new(),
        }
    }

    pub fn past(&self) -> &VecDeque<HistoryState> {
        &self.past
    }

    pub fn future(&self) -> &[HistoryState] {
        &self.future
    }

    pub fn head(&self) -> Option<&HistoryState> {
        self.past.back()
    }

    fn has_applied(&self, id: &StateId) -> bool {
        self.past.iter().any(|s| s.id == *id)
    }
}

/// Branch listing handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub id: BranchId,
    pub name: String,
    pub parent_branch_id: Option<BranchId>,
    pub depth: usize,
    pub redo_depth: usize,
    pub is_current: bool,
}

pub trait HistoryObserver: Send + Sync {
    fn on_state_change(&self, _can_undo: bool, _can_redo: bool) {}

    fn on_branch_change(&self, _branches: &[BranchSummary]) {}
}

pub struct HistoryEngine {
    max_depth: usize,
    branches: Vec<HistoryBranch>,
    current: BranchId,
    listeners: ListenerRegistry<dyn HistoryObserver>,
}

impl HistoryEngine {
    pub const MAIN_BRANCH: &'static str = "main";

    pub fn new(config: &HistoryConfig) -> Self {
        let main = HistoryBranch::new(Self::MAIN_BRANCH, None);
        Self {
            max_depth: config.max_depth.max(1),
            current: main.id,
            branches: vec![main],
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn subscribe(&self, observer: Arc<dyn HistoryObserver>) -> Subscription {
        self.listeners.subscribe(observer)
    }

    pub fn record_operation(&mut self, op: Operation) -> StateId {
        self.push_state(HistoryState::new(vec![op], None))
    }

    /// Records several operations as one undo step. An empty group records
    /// nothing.
    pub fn record_operation_group(
        &mut self,
        ops: Vec<Operation>,
        label: Option<String>,
    ) -> Option<StateId> {
        if ops.is_empty() {
            return None;
        }
        Some(self.push_state(HistoryState::new(ops, label)))
    }

    fn push_state(&mut self, state: HistoryState) -> StateId {
        let id = state.id;
        let max_depth = self.max_depth;
        let branch = self.current_mut();
        branch.past.push_back(state);
        branch.future.clear();
        while branch.past.len() > max_depth {
            branch.past.pop_front();
        }
        self.notify_changed();
        id
    }

    pub fn can_undo(&self) -> bool {
        !self.current_branch().past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.current_branch().future.is_empty()
    }

    /// Returns the inverse operations to apply, or nothing when there is
    /// nothing to undo.
    pub fn undo(&mut self) -> Vec<Operation> {
        let ops = self.step_back().unwrap_or_default();
        if !ops.is_empty() {
            self.notify_changed();
        }
        ops
    }

    /// Returns the original operations to reapply, or nothing when there is
    /// nothing to redo.
    pub fn redo(&mut self) -> Vec<Operation> {
        let ops = self.step_forward().unwrap_or_default();
        if !ops.is_empty() {
            self.notify_changed();
        }
        ops
    }

    fn step_back(&mut self) -> Option<Vec<Operation>> {
        let branch = self.current_mut();
        let state = branch.past.pop_back()?;
        let ops = state.inverse_operations();
        debug!("undo {} on branch {}", state.id, branch.name);
        branch.future.push(state);
        Some(ops)
    }

    fn step_forward(&mut self) -> Option<Vec<Operation>> {
        let branch = self.current_mut();
        let state = branch.future.pop()?;
        let ops = state.operations.clone();
        debug!("redo {} on branch {}", state.id, branch.name);
        branch.past.push_back(state);
        Some(ops)
    }

    /// Moves the current branch to `state_id`, the point right after that
    /// state was applied. Returns the inverse and forward operations to get
    /// the live document there, in application order.
    pub fn go_to_state(&mut self, state_id: StateId) -> Result<Vec<Operation>> {
        let branch = self.current_branch();
        let (undos, redos) = if let Some(index) = branch.past.iter().position(|s| s.id == state_id) {
            (branch.past.len() - 1 - index, 0)
        } else if let Some(index) = branch.future.iter().position(|s| s.id == state_id) {
            (0, branch.future.len() - index)
        } else {
            return Err(CollaborationError::StateNotFound(state_id));
        };

        let mut ops = Vec::new();
        for _ in 0..undos {
            ops.extend(self.step_back().unwrap_or_default());
        }
        for _ in 0..redos {
            ops.extend(self.step_forward().unwrap_or_default());
        }
        if undos + redos > 0 {
            self.notify_changed();
        }
        Ok(ops)
    }

    /// Forks a branch from the current branch's past. The abandoned future
    /// is not carried over. The current branch does not change.
    pub fn create_branch(&mut self, name: impl Into<String>) -> BranchId {
        let parent = self.current_branch();
        let mut branch = HistoryBranch::new(name, Some(parent.id));
        branch.past = parent.past.clone();
        let id = branch.id;
        info!("created history branch {} ({})", branch.name, id);
        self.branches.push(branch);
        self.notify_branches();
        id
    }

    /// Retargets record/undo/redo. Nothing is replayed.
    pub fn switch_branch(&mut self, branch_id: BranchId) -> Result<()> {
        if self.branch(&branch_id).is_none() {
            return Err(CollaborationError::BranchNotFound(branch_id));
        }
        if self.current == branch_id {
            return Ok(());
        }
        self.current = branch_id;
        info!("switched to history branch {}", branch_id);
        self.notify_branches();
        self.notify_state();
        Ok(())
    }

    /// Replays the source branch's states, oldest first, onto the current
    /// branch as new entries. States already applied on the current branch
    /// (in its past) are skipped; shared states it has undone are replayed.
    /// Overlapping targets resolve as last operation wins; the returned
    /// operations are what the caller applies to the document.
    pub fn merge_branch(&mut self, source_id: BranchId) -> Result<Vec<Operation>> {
        if source_id == self.current {
            return Err(CollaborationError::InvalidOp(
                "cannot merge a branch into itself".to_string(),
            ));
        }
        let source = self
            .branch(&source_id)
            .ok_or(CollaborationError::BranchNotFound(source_id))?;
        let target = self.current_branch();

        let replay: Vec<HistoryState> = source
            .past
            .iter()
            .filter(|state| !target.has_applied(&state.id))
            .map(|state| {
                let label = state
                    .label
                    .clone()
                    .or_else(|| Some(format!("merge from {}", source.name)));
                HistoryState::new(state.operations.clone(), label)
            })
            .collect();

        info!(
            "merging {} states from branch {} into {}",
            replay.len(),
            source.name,
            target.name
        );

        let mut ops = Vec::new();
        for state in replay {
            ops.extend(state.operations.iter().cloned());
            self.push_state(state);
        }
        Ok(ops)
    }

    /// Removes a branch other than the current one. Its children are
    /// re-parented to its parent.
    pub fn delete_branch(&mut self, branch_id: BranchId) -> Result<()> {
        if branch_id == self.current {
            return Err(CollaborationError::InvalidOp(
                "cannot delete the current branch".to_string(),
            ));
        }
        let index = self
            .branches
            .iter()
            .position(|b| b.id == branch_id)
            .ok_or(CollaborationError::BranchNotFound(branch_id))?;
        let removed = self.branches.remove(index);
        for branch in &mut self.branches {
            if branch.parent_branch_id == Some(branch_id) {
                branch.parent_branch_id = removed.parent_branch_id;
            }
        }
        self.notify_branches();
        Ok(())
    }

    /// Empties the current branch.
    pub fn clear(&mut self) {
        let branch = self.current_mut();
        branch.past.clear();
        branch.future.clear();
        self.notify_changed();
    }

    pub fn current_branch(&self) -> &HistoryBranch {
        self.branches
            .iter()
            .find(|b| b.id == self.current)
            .unwrap_or(&self.branches[0])
    }

    fn current_mut(&mut self) -> &mut HistoryBranch {
        let current = self.current;
        let index = self
            .branches
            .iter()
            .position(|b| b.id == current)
            .unwrap_or(0);
        &mut self.branches[index]
    }

    pub fn branch(&self, branch_id: &BranchId) -> Option<&HistoryBranch> {
        self.branches.iter().find(|b| b.id == *branch_id)
    }

    pub fn branches(&self) -> Vec<BranchSummary> {
        self.branches
            .iter()
            .map(|b| BranchSummary {
                id: b.id,
                name: b.name.clone(),
                parent_branch_id: b.parent_branch_id,
                depth: b.past.len(),
                redo_depth: b.future.len(),
                is_current: b.id == self.current,
            })
            .collect()
    }

    /// Ids on the current branch from oldest past to furthest future.
    pub fn state_ids(&self) -> Vec<StateId> {
        let branch = self.current_branch();
        branch
            .past
            .iter()
            .map(|s| s.id)
            .chain(branch.future.iter().rev().map(|s| s.id))
            .collect()
    }

    fn notify_state(&self) {
        let (can_undo, can_redo) = (self.can_undo(), self.can_redo());
        self.listeners
            .notify(|l| l.on_state_change(can_undo, can_redo));
    }

    fn notify_branches(&self) {
        let branches = self.branches();
        self.listeners.notify(|l| l.on_branch_change(&branches));
    }

    /// Depths in the branch summaries move with every state change.
    fn notify_changed(&self) {
        self.notify_state();
        self.notify_branches();
    }
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::new(&HistoryConfig::default())
    }
}
