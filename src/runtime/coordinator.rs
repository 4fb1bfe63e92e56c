/// Execution coordinator: the graph scheduler
///
/// Drives one run of a validated graph. Interactive roots are executed one at a time
/// in root order; once all of them have resolved, autonomous roots are launched
/// concurrently. A node runs only after every upstream node is `Done`. When a node
/// completes, the nodes parked on it and its direct successors are re-evaluated.
/// Failures stay local: the failed node goes to `Error` and its successors simply
/// never run.
///
/// All per-run book-keeping (`completed`, `outputs`, parked waiters, upload slots)
/// lives in one `RunBook` behind a mutex that is never held across an await.

use crate::error::{NodeError, UploadProtocolError};
use crate::pipeline::graph::Graph;
use crate::pipeline::types::{InputPort, NodeId};
use crate::runtime::artifact::{Artifact, InputGroup, NodeInputs};
use crate::runtime::history::{HistoryStatus, RunHistory, RunHistoryEntry};
use crate::runtime::runners::{NodeRunners, RunnerContext, UploadedFile};
use crate::runtime::state::{NodeStatus, RunState, StateBoard, StateChange};
use crate::runtime::trace::{Direction, TraceSink};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Collaborators shared by every run
#[derive(Clone)]
pub struct EngineServices {
    pub runners: Arc<NodeRunners>,
    pub trace: Arc<dyn TraceSink>,
    pub history: Arc<dyn RunHistory>,
}

impl EngineServices {
    pub fn new(
        runners: NodeRunners,
        trace: Arc<dyn TraceSink>,
        history: Arc<dyn RunHistory>,
    ) -> Self {
        Self {
            runners: Arc::new(runners),
            trace,
            history,
        }
    }
}

/// Scheduler for one graph; each `start` begins a fresh run
#[derive(Clone)]
pub struct ExecutionCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    pipeline_id: String,
    graph: Arc<Graph>,
    services: EngineServices,
    board: StateBoard,
    current: Mutex<Option<Arc<Run>>>,
}

struct Run {
    id: Uuid,
    epoch: u64,
    book: Mutex<RunBook>,
    cancel: watch::Sender<bool>,
    finished: watch::Sender<bool>,
}

#[derive(Default)]
struct RunBook {
    completed: HashSet<NodeId>,
    /// Nodes whose runner has been dispatched (or that failed before dispatch)
    claimed: HashSet<NodeId>,
    outputs: HashMap<NodeId, Vec<Artifact>>,
    /// blocking upstream -> nodes to re-evaluate once it completes
    waiters: HashMap<NodeId, Vec<NodeId>>,
    /// `None` once resolved
    uploads: HashMap<NodeId, Option<oneshot::Sender<Vec<UploadedFile>>>>,
    /// Driver plus in-flight node tasks
    active: usize,
    aborted: bool,
}

enum Claim {
    Skip,
    Parked,
    Missing(NodeInputs, NodeError),
    Dispatch {
        inputs: NodeInputs,
        upload: Option<oneshot::Receiver<Vec<UploadedFile>>>,
    },
}

impl Run {
    fn new(epoch: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            book: Mutex::new(RunBook::default()),
            cancel: watch::Sender::new(false),
            finished: watch::Sender::new(false),
        }
    }

    fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.book.lock().active += 1;
        ActiveGuard(Arc::clone(self))
    }

    fn is_aborted(&self) -> bool {
        self.book.lock().aborted
    }
}

/// Marks the run quiescent when the last active task ends
struct ActiveGuard(Arc<Run>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut book = self.0.book.lock();
        book.active = book.active.saturating_sub(1);
        if book.active == 0 {
            self.0.finished.send_replace(true);
        }
    }
}

impl ExecutionCoordinator {
    pub fn new(pipeline_id: impl Into<String>, graph: Arc<Graph>, services: EngineServices) -> Self {
        let board = StateBoard::new(graph.node_ids().cloned());
        Self {
            shared: Arc::new(Shared {
                pipeline_id: pipeline_id.into(),
                graph,
                services,
                board,
                current: Mutex::new(None),
            }),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    /// Every state change of every run of this coordinator
    pub fn events(&self) -> broadcast::Receiver<StateChange> {
        self.shared.board.events()
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.shared.board.status(node_id)
    }

    /// Start a fresh run: aborts any in-flight run and resets every node to `Idle`
    pub fn start(&self) -> RunHandle {
        // Held across abort, reset and install
        let mut current = self.shared.current.lock();
        if let Some(previous) = current.take() {
            self.shared.abort(&previous);
        }

        let epoch = self.shared.board.reset();
        let run = Arc::new(Run::new(epoch));
        let driver = run.enter();
        *current = Some(Arc::clone(&run));
        drop(current);

        tracing::info!(
            "🚀 Starting run {} of pipeline '{}' ({} nodes, {} edges)",
            run.id,
            self.shared.pipeline_id,
            self.shared.graph.nodes().len(),
            self.shared.graph.edges().len()
        );
        tracing::debug!("📋 Execution order: {:?}", self.shared.graph.topological_order());

        tokio::spawn(drive(Arc::clone(&self.shared), Arc::clone(&run), driver));

        RunHandle {
            shared: Arc::clone(&self.shared),
            run,
        }
    }

    /// Abort the current run, if any
    pub fn abort_run(&self) {
        let current = self.shared.current.lock().clone();
        if let Some(run) = current {
            self.shared.abort(&run);
        }
    }
}

/// Start a run of `graph` on a fresh coordinator
pub fn start_run(pipeline_id: impl Into<String>, graph: Arc<Graph>, services: EngineServices) -> RunHandle {
    ExecutionCoordinator::new(pipeline_id, graph, services).start()
}

async fn drive(shared: Arc<Shared>, run: Arc<Run>, _active: ActiveGuard) {
    let (interactive, autonomous) = shared.graph.partition_roots();
    tracing::debug!(
        "🎯 Roots: interactive {:?}, autonomous {:?}",
        interactive,
        autonomous
    );

    for root in interactive {
        if run.is_aborted() {
            return;
        }
        run_node(Arc::clone(&shared), Arc::clone(&run), root).await;
    }

    if run.is_aborted() {
        return;
    }
    for root in autonomous {
        spawn_node(&shared, &run, root);
    }
}

fn spawn_node(shared: &Arc<Shared>, run: &Arc<Run>, id: NodeId) {
    let active = run.enter();
    let shared = Arc::clone(shared);
    let run = Arc::clone(run);
    tokio::spawn(async move {
        run_node(shared, run, id).await;
        drop(active);
    });
}

/// Evaluate one node: no-op if already handled, park if blocked, otherwise execute
fn run_node(shared: Arc<Shared>, run: Arc<Run>, id: NodeId) -> BoxFuture<'static, ()> {
    async move {
        match shared.claim(&run, &id) {
            Claim::Skip | Claim::Parked => {}
            Claim::Missing(inputs, error) => shared.fail(&run, &id, &inputs, error).await,
            Claim::Dispatch { inputs, upload } => {
                execute(&shared, &run, &id, inputs, upload).await;
            }
        }
    }
    .boxed()
}

async fn execute(
    shared: &Arc<Shared>,
    run: &Arc<Run>,
    id: &str,
    inputs: NodeInputs,
    upload: Option<oneshot::Receiver<Vec<UploadedFile>>>,
) {
    let Some(node) = shared.graph.node(id) else {
        return;
    };

    for artifact in inputs.iter() {
        shared.services.trace.record(id, Direction::Input, artifact);
    }

    let mut ctx = RunnerContext::default();
    if let Some(upload) = upload {
        tracing::info!("⏳ Node '{}' awaiting upload", id);
        let received = tokio::select! {
            files = upload => files.ok(),
            _ = until_cancelled(run.cancel.subscribe()) => None,
        };
        let Some(files) = received else {
            tracing::debug!("🛑 Upload wait for '{}' ended without files", id);
            return;
        };
        {
            let book = run.book.lock();
            if book.aborted {
                return;
            }
            shared
                .board
                .transition(run.epoch, id, NodeStatus::of(RunState::Running));
        }
        ctx.uploaded = Some(files);
    }

    tracing::info!("🚀 Running node '{}' (category: {:?})", id, node.category());
    let started = Instant::now();
    let runner = shared.services.runners.runner_for(node.category());
    let outcome = tokio::select! {
        result = runner.execute(node, &inputs, ctx) => result,
        _ = until_cancelled(run.cancel.subscribe()) => Err(NodeError::Cancelled),
    };

    match outcome {
        Ok(artifacts) => {
            tracing::info!(
                "✅ Node '{}' completed in {:?} with {} artifact(s)",
                id,
                started.elapsed(),
                artifacts.len()
            );
            shared.complete(run, id, &inputs, artifacts).await;
        }
        Err(NodeError::Cancelled) => {
            tracing::debug!("🛑 Node '{}' cancelled after {:?}", id, started.elapsed());
        }
        Err(error) => shared.fail(run, id, &inputs, error).await,
    }
}

/// Resolves once `true` has been sent on the cancel channel
async fn until_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Shared {
    fn claim(&self, run: &Run, id: &str) -> Claim {
        let Some(node) = self.graph.node(id) else {
            tracing::warn!("⚠️ run_node called for unknown node '{}'", id);
            return Claim::Skip;
        };

        let mut book = run.book.lock();
        if book.aborted || book.completed.contains(id) || book.claimed.contains(id) {
            return Claim::Skip;
        }

        let blocker = self
            .graph
            .upstream(id)
            .into_iter()
            .find(|up| !book.completed.contains(up));
        if let Some(blocker) = blocker {
            tracing::debug!("⏸️ Node '{}' waits on '{}'", id, blocker);
            let parked = book.waiters.entry(blocker).or_default();
            if !parked.iter().any(|w| w == id) {
                parked.push(id.to_string());
            }
            return Claim::Parked;
        }

        book.claimed.insert(id.to_string());
        let inputs = gather_inputs(&self.graph, &book, id);

        if node.category().requires_input() && !inputs.has_primary() {
            let error = NodeError::missing_input(id, "upstream produced no artifacts");
            return Claim::Missing(inputs, error);
        }

        if node.is_interactive() {
            let (tx, rx) = oneshot::channel();
            book.uploads.insert(id.to_string(), Some(tx));
            self.board
                .transition(run.epoch, id, NodeStatus::of(RunState::AwaitingInput));
            Claim::Dispatch {
                inputs,
                upload: Some(rx),
            }
        } else {
            self.board
                .transition(run.epoch, id, NodeStatus::of(RunState::Running));
            Claim::Dispatch {
                inputs,
                upload: None,
            }
        }
    }

    async fn complete(
        self: &Arc<Self>,
        run: &Arc<Run>,
        id: &str,
        inputs: &NodeInputs,
        artifacts: Vec<Artifact>,
    ) {
        for artifact in &artifacts {
            self.services.trace.record(id, Direction::Output, artifact);
        }

        let released = {
            let mut book = run.book.lock();
            if book.aborted {
                return;
            }
            book.outputs.insert(id.to_string(), artifacts.clone());
            book.completed.insert(id.to_string());
            self.board
                .transition(run.epoch, id, NodeStatus::of(RunState::Done));
            book.waiters.remove(id).unwrap_or_default()
        };

        self.append_history(run, id, HistoryStatus::Done, inputs, &artifacts)
            .await;

        let mut next = released;
        for successor in self.graph.downstream(id) {
            if !next.contains(&successor) {
                next.push(successor);
            }
        }
        for node in next {
            spawn_node(self, run, node);
        }
    }

    async fn fail(&self, run: &Run, id: &str, inputs: &NodeInputs, error: NodeError) {
        {
            let mut book = run.book.lock();
            if book.aborted {
                return;
            }
            book.outputs.insert(id.to_string(), Vec::new());
            self.board
                .transition(run.epoch, id, NodeStatus::failed(error.to_string()));
        }
        tracing::error!("❌ Node '{}' failed: {}", id, error);
        self.append_history(run, id, HistoryStatus::Error, inputs, &[])
            .await;
    }

    fn abort(&self, run: &Run) {
        {
            let mut book = run.book.lock();
            if book.aborted {
                return;
            }
            book.aborted = true;
            book.waiters.clear();
            // Dropping the senders wakes every pending upload wait
            book.uploads.clear();
        }
        run.cancel.send_replace(true);
        self.board.abort_to_idle(run.epoch);
        tracing::warn!("🛑 Run {} of pipeline '{}' aborted", run.id, self.pipeline_id);
    }

    async fn append_history(
        &self,
        run: &Run,
        id: &str,
        status: HistoryStatus,
        inputs: &NodeInputs,
        outputs: &[Artifact],
    ) {
        let entry = RunHistoryEntry {
            run_id: run.id.to_string(),
            pipeline_id: self.pipeline_id.clone(),
            node_id: id.to_string(),
            timestamp: chrono::Utc::now(),
            status,
            input_file_name: inputs.iter().next().map(|a| a.name().to_string()),
            output_file_name: outputs.first().map(|a| a.name().to_string()),
        };
        if let Err(e) = self.services.history.append(entry).await {
            tracing::warn!("⚠️ Failed to append run history for '{}': {}", id, e);
        }
    }
}

/// Inputs of `id` in edge declaration order; feedback edges only once armed
fn gather_inputs(graph: &Graph, book: &RunBook, id: &str) -> NodeInputs {
    let mut groups: Vec<InputGroup> = Vec::new();
    for edge in graph.incoming(id) {
        let port = edge.input_port();
        if port == InputPort::Feedback && !book.completed.contains(&edge.source) {
            continue;
        }
        if groups.iter().any(|g| g.source == edge.source && g.port == port) {
            continue;
        }
        groups.push(InputGroup {
            source: edge.source.clone(),
            port,
            artifacts: book.outputs.get(&edge.source).cloned().unwrap_or_default(),
        });
    }
    tracing::debug!("📥 Node '{}' resolved {} input group(s)", id, groups.len());
    NodeInputs::new(groups)
}

/// Handle on one run, given to the embedder
#[derive(Clone)]
pub struct RunHandle {
    shared: Arc<Shared>,
    run: Arc<Run>,
}

/// Snapshot taken once a run is quiescent
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub aborted: bool,
    pub states: BTreeMap<NodeId, NodeStatus>,
    pub outputs: HashMap<NodeId, Vec<Artifact>>,
}

impl RunReport {
    pub fn state(&self, node_id: &str) -> Option<RunState> {
        self.states.get(node_id).map(|s| s.state)
    }
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn pipeline_id(&self) -> &str {
        &self.shared.pipeline_id
    }

    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    /// Latest status of a node (the board reflects the coordinator's newest run)
    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.shared.board.status(node_id)
    }

    pub fn states(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.shared.board.snapshot()
    }

    /// False once a newer run of the same coordinator has started
    pub fn is_current(&self) -> bool {
        self.shared
            .current
            .lock()
            .as_ref()
            .is_some_and(|run| Arc::ptr_eq(run, &self.run))
    }

    pub fn subscribe(&self, node_id: &str) -> Option<watch::Receiver<NodeStatus>> {
        self.shared.board.subscribe(node_id)
    }

    /// Invoke `callback` on every status change of `node_id` within this run
    ///
    /// Changes are read from the board's event stream, so intermediate states are
    /// delivered in order rather than coalesced. Only changes made after this call
    /// are observed.
    pub fn on_state_change<F>(&self, node_id: &str, mut callback: F) -> Option<JoinHandle<()>>
    where
        F: FnMut(NodeStatus) + Send + 'static,
    {
        self.shared.graph.node(node_id)?;
        let mut events = self.shared.board.events();
        let node_id = node_id.to_string();
        let epoch = self.run.epoch;
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) if change.epoch == epoch && change.node_id == node_id => {
                        callback(change.status);
                    }
                    Ok(change) if change.epoch > epoch => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("⚠️ State listener for '{}' lagged by {}", node_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Artifacts produced by a node in this run
    pub fn outputs(&self, node_id: &str) -> Option<Vec<Artifact>> {
        self.run.book.lock().outputs.get(node_id).cloned()
    }

    pub fn is_finished(&self) -> bool {
        *self.run.finished.borrow()
    }

    /// Hand the files for an interactive trigger to its wait handle (exactly once)
    pub fn resolve_upload(
        &self,
        node_id: &str,
        files: Vec<UploadedFile>,
    ) -> Result<(), UploadProtocolError> {
        let mut book = self.run.book.lock();
        let slot = book
            .uploads
            .get_mut(node_id)
            .ok_or_else(|| UploadProtocolError::NotAwaiting(node_id.to_string()))?;
        let Some(tx) = slot.take() else {
            tracing::error!("❌ Upload for '{}' resolved twice", node_id);
            return Err(UploadProtocolError::AlreadyResolved(node_id.to_string()));
        };
        tracing::info!("📥 Upload resolved for '{}' ({} file(s))", node_id, files.len());
        tx.send(files)
            .map_err(|_| UploadProtocolError::Closed(node_id.to_string()))
    }

    /// Cancel this run; non-terminal nodes return to `Idle`
    pub fn abort(&self) {
        self.shared.abort(&self.run);
    }

    /// Evaluate a node within this run; a no-op once it has been handled
    pub async fn run_node(&self, node_id: &str) {
        let _active = self.run.enter();
        run_node(
            Arc::clone(&self.shared),
            Arc::clone(&self.run),
            node_id.to_string(),
        )
        .await;
    }

    /// Wait until no further progress is possible, then report
    pub async fn wait(&self) -> RunReport {
        let mut finished = self.run.finished.subscribe();
        loop {
            if *finished.borrow_and_update() {
                break;
            }
            if finished.changed().await.is_err() {
                break;
            }
        }
        self.report()
    }

    pub fn report(&self) -> RunReport {
        let (aborted, outputs) = {
            let book = self.run.book.lock();
            (book.aborted, book.outputs.clone())
        };
        RunReport {
            run_id: self.run.id,
            aborted,
            states: self.shared.board.snapshot(),
            outputs,
        }
    }
}
