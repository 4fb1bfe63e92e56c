/// Per-node run state and its observers
///
/// The coordinator is the only writer. Readers either hold a `watch` receiver per
/// node or subscribe to the `broadcast` stream of every change. Each run has an
/// epoch; writes tagged with an older epoch are dropped, which keeps stragglers of an
/// aborted run from leaking into the next one.

use crate::pipeline::types::NodeId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, watch};

/// Lifecycle status of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingInput,
    Running,
    Done,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Forward transitions allowed within a single run
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, AwaitingInput)
                | (Idle, Running)
                | (Idle, Error)
                | (AwaitingInput, Running)
                | (AwaitingInput, Error)
                | (Running, Done)
                | (Running, Error)
        )
    }
}

/// Observable status value of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeStatus {
    pub fn idle() -> Self {
        Self::of(RunState::Idle)
    }

    pub fn of(state: RunState) -> Self {
        Self { state, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: RunState::Error,
            error: Some(message.into()),
        }
    }
}

/// One transition, as seen by broadcast subscribers
#[derive(Debug, Clone)]
pub struct StateChange {
    pub epoch: u64,
    pub node_id: NodeId,
    pub status: NodeStatus,
}

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct BoardInner {
    epoch: u64,
    nodes: HashMap<NodeId, watch::Sender<NodeStatus>>,
}

/// State of every node of one graph, shared across that graph's runs
#[derive(Debug)]
pub struct StateBoard {
    inner: Mutex<BoardInner>,
    events: broadcast::Sender<StateChange>,
}

impl StateBoard {
    pub fn new<I>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let nodes = node_ids
            .into_iter()
            .map(|id| (id, watch::Sender::new(NodeStatus::idle())))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(BoardInner { epoch: 0, nodes }),
            events,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Start a new epoch with every node back at `Idle`
    pub fn reset(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        let epoch = inner.epoch;
        for (id, tx) in &inner.nodes {
            tx.send_replace(NodeStatus::idle());
            self.emit(epoch, id, NodeStatus::idle());
        }
        epoch
    }

    /// Apply a transition for `epoch`; returns false when it was dropped
    pub fn transition(&self, epoch: u64, node_id: &str, status: NodeStatus) -> bool {
        let inner = self.inner.lock();
        if inner.epoch != epoch {
            tracing::debug!("⏭️ Dropping stale transition of '{}' from epoch {}", node_id, epoch);
            return false;
        }
        let Some(tx) = inner.nodes.get(node_id) else {
            tracing::warn!("⚠️ Transition for unknown node '{}'", node_id);
            return false;
        };

        let current = tx.borrow().state;
        if !current.can_advance_to(status.state) {
            tracing::warn!(
                "⚠️ Rejected transition of '{}': {:?} -> {:?}",
                node_id,
                current,
                status.state
            );
            return false;
        }

        tx.send_replace(status.clone());
        self.emit(epoch, node_id, status);
        true
    }

    /// Force every non-terminal node of `epoch` back to `Idle`
    pub fn abort_to_idle(&self, epoch: u64) {
        let inner = self.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        for (id, tx) in &inner.nodes {
            let state = tx.borrow().state;
            if !state.is_terminal() && state != RunState::Idle {
                tx.send_replace(NodeStatus::idle());
                self.emit(epoch, id, NodeStatus::idle());
            }
        }
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.inner
            .lock()
            .nodes
            .get(node_id)
            .map(|tx| tx.borrow().clone())
    }

    pub fn snapshot(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.inner
            .lock()
            .nodes
            .iter()
            .map(|(id, tx)| (id.clone(), tx.borrow().clone()))
            .collect()
    }

    pub fn subscribe(&self, node_id: &str) -> Option<watch::Receiver<NodeStatus>> {
        self.inner.lock().nodes.get(node_id).map(watch::Sender::subscribe)
    }

    pub fn events(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    fn emit(&self, epoch: u64, node_id: &str, status: NodeStatus) {
        // No subscribers is fine
        let _ = self.events.send(StateChange {
            epoch,
            node_id: node_id.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> StateBoard {
        StateBoard::new(["a".to_string(), "b".to_string()])
    }

    #[test]
    fn terminal_states_do_not_regress_within_a_run() {
        let board = board();
        let epoch = board.reset();

        assert!(board.transition(epoch, "a", NodeStatus::of(RunState::Running)));
        assert!(board.transition(epoch, "a", NodeStatus::of(RunState::Done)));
        assert!(!board.transition(epoch, "a", NodeStatus::of(RunState::Running)));
        assert!(!board.transition(epoch, "a", NodeStatus::idle()));
        assert_eq!(board.status("a").unwrap().state, RunState::Done);

        board.abort_to_idle(epoch);
        assert_eq!(board.status("a").unwrap().state, RunState::Done);
    }

    #[test]
    fn stale_epochs_are_ignored_and_reset_clears_everything() {
        let board = board();
        let first = board.reset();
        board.transition(first, "b", NodeStatus::failed("boom"));

        let second = board.reset();
        assert_eq!(board.status("b").unwrap(), NodeStatus::idle());
        assert!(!board.transition(first, "a", NodeStatus::of(RunState::Running)));
        assert_eq!(board.status("a").unwrap().state, RunState::Idle);
        assert!(board.transition(second, "a", NodeStatus::of(RunState::AwaitingInput)));

        board.abort_to_idle(second);
        assert_eq!(board.status("a").unwrap().state, RunState::Idle);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let board = board();
        let epoch = board.reset();
        let mut rx = board.subscribe("a").unwrap();
        let mut events = board.events();

        board.transition(epoch, "a", NodeStatus::of(RunState::Running));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, RunState::Running);

        let change = events.recv().await.unwrap();
        assert_eq!(change.node_id, "a");
        assert_eq!(change.status.state, RunState::Running);
        assert_eq!(change.epoch, epoch);
    }
}
