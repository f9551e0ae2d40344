//! Discovery worker task
//!
//! The engine lives inside its own task and owns everything it touches.
//! Callers talk to it through [`DiscoveryHandle`], which sends a command and
//! awaits the reply on a oneshot channel.

use super::{DiscoveryEngine, DiscoveryReport, DiscoveryRequest};
use crate::addresses::WalletSeed;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

const COMMAND_QUEUE: usize = 8;

pub enum DiscoveryCommand {
    Discover {
        seed: WalletSeed,
        request: DiscoveryRequest,
        reply: oneshot::Sender<SyncResult<DiscoveryReport>>,
    },
}

#[derive(Clone)]
pub struct DiscoveryHandle {
    sender: mpsc::Sender<DiscoveryCommand>,
}

impl DiscoveryHandle {
    /// Start the worker; it exits on shutdown or once every handle is dropped
    pub fn spawn(engine: DiscoveryEngine, shutdown: Arc<Notify>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(COMMAND_QUEUE);

        let handle = tokio::spawn(async move {
            logger::debug(
                LogTag::Discovery,
                &format!("Discovery worker started for {}", engine.network()),
            );
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    command = receiver.recv() => match command {
                        Some(DiscoveryCommand::Discover { seed, request, reply }) => {
                            let outcome = engine.discover(&seed, &request).await;
                            if reply.send(outcome).is_err() {
                                logger::debug(
                                    LogTag::Discovery,
                                    "Discovery caller went away before the reply",
                                );
                            }
                        }
                        None => break,
                    },
                }
            }
            logger::debug(LogTag::Discovery, "Discovery worker stopped");
        });

        (Self { sender }, handle)
    }

    pub async fn discover(
        &self,
        seed: WalletSeed,
        request: DiscoveryRequest,
    ) -> SyncResult<DiscoveryReport> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(DiscoveryCommand::Discover { seed, request, reply })
            .await
            .map_err(|_| SyncError::InvalidState("discovery worker is not running".to_string()))?;
        response.await.map_err(|_| {
            SyncError::InvalidState("discovery worker dropped the request".to_string())
        })?
    }
}
