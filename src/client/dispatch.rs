//! Deferred execution of client operations.
//!
//! An [`Operation`] is handed to a worker thread and its [`Outcome`] comes
//! back over a channel, in the spirit of the host engine's completion
//! callbacks. Operations dispatched independently race through the
//! engine's own locking; no ordering between them is implied.

use super::{OperationKind, RecordStoreClient};
use crate::engine::OpenRequest;
use crate::error::{Result, StoreError};
use crate::types::{Key, Record};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

/// A client operation together with its inputs.
#[derive(Debug)]
pub enum Operation {
    InsertOne {
        request: OpenRequest,
        record: Record,
        collection: String,
    },
    ReadAll {
        request: OpenRequest,
        collection: String,
    },
    ReadOne {
        request: OpenRequest,
        collection: String,
        key: Key,
    },
    UpdateOne {
        request: OpenRequest,
        collection: String,
        record: Record,
        key: Key,
    },
    DeleteOne {
        request: OpenRequest,
        collection: String,
        key: Key,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::InsertOne { .. } => OperationKind::InsertOne,
            Operation::ReadAll { .. } => OperationKind::ReadAll,
            Operation::ReadOne { .. } => OperationKind::ReadOne,
            Operation::UpdateOne { .. } => OperationKind::UpdateOne,
            Operation::DeleteOne { .. } => OperationKind::DeleteOne,
        }
    }
}

/// Result of a successful operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Inserted(Key),
    Records(Vec<Record>),
    Record(Option<Record>),
    Updated,
    Deleted,
}

/// Receiving end of a dispatched operation.
pub struct Completion {
    receiver: Receiver<Result<Outcome>>,
}

impl Completion {
    /// Block until the operation finishes.
    pub fn wait(self) -> Result<Outcome> {
        self.receiver.recv().unwrap_or_else(|_| Err(worker_lost()))
    }

    /// Wait up to `timeout`; `None` if the operation is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Outcome>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(worker_lost())),
        }
    }

    /// Take the outcome if it is ready.
    pub fn try_take(&self) -> Option<Result<Outcome>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_lost())),
        }
    }
}

fn worker_lost() -> StoreError {
    StoreError::Aborted("operation finished without reporting an outcome".into())
}

impl RecordStoreClient {
    /// Run an operation on the calling thread.
    pub fn execute(&self, operation: Operation) -> Result<Outcome> {
        match operation {
            Operation::InsertOne {
                request,
                record,
                collection,
            } => self
                .insert_one(request, record, &collection)
                .map(Outcome::Inserted),
            Operation::ReadAll {
                request,
                collection,
            } => self.read_all(request, &collection).map(Outcome::Records),
            Operation::ReadOne {
                request,
                collection,
                key,
            } => self
                .read_one(request, &collection, key)
                .map(Outcome::Record),
            Operation::UpdateOne {
                request,
                collection,
                record,
                key,
            } => self
                .update_one(request, &collection, record, key)
                .map(|_| Outcome::Updated),
            Operation::DeleteOne {
                request,
                collection,
                key,
            } => self
                .delete_one(request, &collection, key)
                .map(|_| Outcome::Deleted),
        }
    }

    /// Run an operation on a worker thread and return its completion handle.
    pub fn dispatch(&self, operation: Operation) -> Completion {
        let (sender, receiver) = bounded(1);
        let worker_sender = sender.clone();
        let client = self.clone();
        let kind = operation.kind();

        let spawned = thread::Builder::new()
            .name("record-store-op".to_string())
            .spawn(move || {
                let _ = worker_sender.send(client.execute(operation));
            });

        if let Err(e) = spawned {
            tracing::error!(?kind, error = %e, "failed to start worker");
            let _ = sender.send(Err(e.into()));
        }

        Completion { receiver }
    }
}
