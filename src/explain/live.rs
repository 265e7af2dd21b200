//! Live EXPLAIN of a statement running on another thread.
//!
//! Plans are owned by the executing thread and are never read concurrently.
//! An observer posts a request over a channel; the owner answers it at its
//! next safe point by rendering a snapshot and sending the text back.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{ExplainFlags, ExplainFormat};
use crate::error::{ExplainError, Result};
use crate::explain::query_plan::QueryPlan;

/// What the observer wants rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExplainRequest {
    /// Output format.
    pub format: ExplainFormat,
    /// Optional tabular columns.
    pub flags: ExplainFlags,
    /// Include runtime counters (SHOW ANALYZE).
    pub is_analyze: bool,
}

/// Identity of the observing session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    /// User name.
    pub user: String,
    /// May observe statements of other users.
    pub privileged: bool,
}

impl Requester {
    /// Unprivileged requester.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: name.into(),
            privileged: false,
        }
    }

    /// Requester allowed to observe any connection.
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            user: name.into(),
            privileged: true,
        }
    }
}

struct PendingRequest {
    request: ExplainRequest,
    reply: Sender<Result<String>>,
}

struct Entry {
    owner: String,
    generation: u64,
    sender: Sender<PendingRequest>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<u64, Entry>,
    next_generation: u64,
}

/// Connections that currently run an explainable statement.
#[derive(Clone, Default)]
pub struct StatementRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl StatementRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces that `connection` started a statement owned by `owner`.
    ///
    /// The returned slot must stay on the executing thread; dropping it ends
    /// the statement's visibility.
    pub fn register(&self, connection: u64, owner: impl Into<String>) -> StatementSlot {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        if state
            .entries
            .insert(
                connection,
                Entry {
                    owner: owner.into(),
                    generation,
                    sender,
                },
            )
            .is_some()
        {
            warn!(connection, "replacing a still-registered statement");
        }
        debug!(connection, generation, "statement registered for live explain");
        StatementSlot {
            registry: self.clone(),
            connection,
            generation,
            receiver,
        }
    }

    /// Whether `connection` is currently registered.
    pub fn is_running(&self, connection: u64) -> bool {
        self.state.lock().entries.contains_key(&connection)
    }

    /// Asks the thread running `connection` for a rendering of its plan and
    /// waits up to `timeout` for the answer.
    pub fn request_explain(
        &self,
        connection: u64,
        requester: &Requester,
        request: ExplainRequest,
        timeout: Duration,
    ) -> Result<String> {
        let (reply, answer) = mpsc::channel();
        {
            let state = self.state.lock();
            let entry = state
                .entries
                .get(&connection)
                .ok_or(ExplainError::NotRunning(connection))?;
            if !requester.privileged && requester.user != entry.owner {
                warn!(connection, user = %requester.user, "live explain denied");
                return Err(ExplainError::PermissionDenied {
                    user: requester.user.clone(),
                    connection,
                });
            }
            entry
                .sender
                .send(PendingRequest { request, reply })
                .map_err(|_| ExplainError::NotRunning(connection))?;
        }
        debug!(connection, user = %requester.user, "live explain requested");

        let started = Instant::now();
        match answer.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                warn!(connection, waited_ms, "live explain timed out");
                Err(ExplainError::Timeout {
                    connection,
                    waited_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExplainError::NotRunning(connection)),
        }
    }

    fn unregister(&self, connection: u64, generation: u64) {
        let mut state = self.state.lock();
        if state
            .entries
            .get(&connection)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.entries.remove(&connection);
            debug!(connection, "statement unregistered from live explain");
        }
    }
}

/// Executing-thread side of a registered statement.
pub struct StatementSlot {
    registry: StatementRegistry,
    connection: u64,
    generation: u64,
    receiver: Receiver<PendingRequest>,
}

impl StatementSlot {
    /// Connection the slot was registered for.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Answers every pending request from `plan`. Returns how many were
    /// answered. Called at safe points between rows or phases.
    pub fn service_requests(&self, plan: &QueryPlan) -> usize {
        let mut answered = 0;
        while let Ok(pending) = self.receiver.try_recv() {
            let req = pending.request;
            let rendered = plan.render_text(req.format, req.flags, req.is_analyze);
            if let Err(err) = &rendered {
                debug!(connection = self.connection, code = err.code(), "live explain render failed");
            }
            // The observer may have given up already.
            let _ = pending.reply.send(rendered);
            answered += 1;
        }
        answered
    }
}

impl Drop for StatementSlot {
    fn drop(&mut self) {
        self.registry.unregister(self.connection, self.generation);
    }
}
