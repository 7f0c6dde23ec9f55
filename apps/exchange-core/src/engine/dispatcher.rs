//! Match Dispatcher
//! Consumes the match outbox: one serialized worker per market, so passes on
//! the same book never interleave. Tasks stay pending in the store until their
//! pass finished, and are replayed by `recover` after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::engine::matching::MatchingEngine;
use crate::error::{ExchangeError, Result};
use crate::store::SharedStore;

enum Job {
    Match(Uuid),
    Barrier(oneshot::Sender<()>),
}

type Workers = HashMap<Uuid, mpsc::UnboundedSender<Job>>;

pub struct MatchDispatcher {
    engine: Arc<MatchingEngine>,
    store: SharedStore,
    workers: Mutex<Workers>,
}

impl MatchDispatcher {
    pub fn new(engine: Arc<MatchingEngine>, store: SharedStore) -> Self {
        Self {
            engine,
            store,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a matching pass for `order_id` behind everything already queued
    /// for its market
    pub fn enqueue(&self, market_id: Uuid, order_id: Uuid) {
        self.send(market_id, Job::Match(order_id));
    }

    /// Resolves once every pass queued for `market_id` before this call finished
    pub async fn barrier(&self, market_id: Uuid) {
        let (tx, rx) = oneshot::channel();
        self.send(market_id, Job::Barrier(tx));
        let _ = rx.await;
    }

    /// Re-queues outbox rows left pending by a previous run
    pub async fn recover(&self) -> Result<usize> {
        let tasks = self.store.pending_match_tasks().await?;
        let count = tasks.len();
        for task in tasks {
            self.enqueue(task.market_id, task.order_id);
        }
        if count > 0 {
            tracing::info!(count = count, "Recovered pending match tasks");
        }
        Ok(count)
    }

    /// Drops the market's worker once it has drained its queue. Used when a
    /// market can no longer trade; a later enqueue starts a fresh worker.
    pub fn retire(&self, market_id: Uuid) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if workers.remove(&market_id).is_some() {
            tracing::debug!(market_id = %market_id, "Match worker retired");
        }
    }

    /// Markets that currently own a worker
    pub fn active_workers(&self) -> usize {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn send(&self, market_id: Uuid, job: Job) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());

        let job = match workers.get(&market_id) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let tx = self.spawn_worker(market_id);
        // A fresh receiver is alive, so this send cannot fail
        let _ = tx.send(job);
        workers.insert(market_id, tx);
    }

    fn spawn_worker(&self, market_id: Uuid) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let engine = self.engine.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            tracing::debug!(market_id = %market_id, "Match worker started");
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Match(order_id) => run_pass(&engine, &store, order_id).await,
                    Job::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!(market_id = %market_id, "Match worker stopped");
        });

        tx
    }
}

async fn run_pass(engine: &MatchingEngine, store: &SharedStore, order_id: Uuid) {
    let done = match engine.match_order(order_id).await {
        Ok(_) => true,
        Err(ExchangeError::NotFound(_)) => {
            tracing::warn!(order_id = %order_id, "Match task for unknown order dropped");
            true
        }
        Err(e) => {
            tracing::error!(
                order_id = %order_id,
                error = %e,
                "Matching pass failed; task left pending"
            );
            false
        }
    };

    if done {
        if let Err(e) = store.complete_match_task(order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "Failed to complete match task");
        }
    }
}
