//! Runs the agent on its own task
//!
//! Pages never touch the agent directly; they send lifecycle events and
//! requests through an [`AgentHandle`] and get answers back over channels.

use super::agent::{AgentState, InstallReport, OfflineAgent};
use super::http::{FetchOutcome, FetchRequest};
use crate::error::{AppError, Result};
use tokio::sync::{mpsc, oneshot};

enum AgentEvent {
    Install(oneshot::Sender<InstallReport>),
    Activate(oneshot::Sender<Vec<String>>),
    Fetch(FetchRequest, oneshot::Sender<FetchOutcome>),
    State(oneshot::Sender<AgentState>),
}

/// Start the agent's event loop. It stops once every handle is dropped.
pub fn spawn_agent(agent: OfflineAgent) -> AgentHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(agent, rx));
    AgentHandle { tx }
}

async fn run(mut agent: OfflineAgent, mut rx: mpsc::Receiver<AgentEvent>) {
    tracing::debug!("Offline agent started for {}", agent.manifest().cache_name());

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Install(reply) => {
                let _ = reply.send(agent.install().await);
            }
            AgentEvent::Activate(reply) => {
                let _ = reply.send(agent.activate().await);
            }
            AgentEvent::Fetch(request, reply) => {
                let _ = reply.send(agent.fetch(&request).await);
            }
            AgentEvent::State(reply) => {
                let _ = reply.send(agent.state());
            }
        }
    }

    tracing::debug!("Offline agent stopped");
}

#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
}

impl AgentHandle {
    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> AgentEvent) -> Result<T> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| AppError::Generic("Offline agent has stopped".to_string()))?;
        answer
            .await
            .map_err(|_| AppError::Generic("Offline agent has stopped".to_string()))
    }

    pub async fn install(&self) -> Result<InstallReport> {
        self.ask(AgentEvent::Install).await
    }

    pub async fn activate(&self) -> Result<Vec<String>> {
        self.ask(AgentEvent::Activate).await
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        self.ask(|reply| AgentEvent::Fetch(request, reply)).await
    }

    pub async fn state(&self) -> Result<AgentState> {
        self.ask(AgentEvent::State).await
    }
}
