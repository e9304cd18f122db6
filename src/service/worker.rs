//! Dedicated inference thread.
//!
//! The classifier lives on one OS thread and handles jobs in arrival order.
//! Async handlers submit a job over a std channel and await the reply on a
//! oneshot, so numeric work never runs on the tokio runtime.

use burn::tensor::backend::Backend;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::error::ServiceError;
use crate::classify::{AudioClassifier, InferenceRequest, InferenceResponse};
use crate::error::{panic_message, ClassifyError, ClassifyResult};
use crate::model::SpectrogramClassifier;

pub enum WorkerJob {
    Classify {
        request: InferenceRequest,
        reply: oneshot::Sender<ClassifyResult<InferenceResponse>>,
    },
    Shutdown,
}

/// Cloneable sender side of the inference worker.
#[derive(Clone)]
pub struct InferenceHandle {
    tx: mpsc::Sender<WorkerJob>,
}

impl InferenceHandle {
    /// Queue a request and wait for its result.
    pub async fn classify(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerJob::Classify { request, reply })
            .map_err(|_| ServiceError::Unavailable)?;
        let result = rx.await.map_err(|_| ServiceError::Unavailable)?;
        Ok(result?)
    }

    /// Ask the worker to exit after the jobs already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerJob::Shutdown);
    }
}

pub fn spawn_inference_worker<B, M>(
    classifier: AudioClassifier<B, M>,
) -> (InferenceHandle, JoinHandle<()>)
where
    B: Backend,
    M: SpectrogramClassifier<B> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<WorkerJob>();

    let join = std::thread::spawn(move || {
        info!("Inference worker started");
        loop {
            match rx.recv() {
                Ok(WorkerJob::Shutdown) | Err(_) => {
                    info!("Inference worker shutting down");
                    break;
                }
                Ok(WorkerJob::Classify { request, reply }) => {
                    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                        classifier.classify(&request)
                    }));
                    let result = attempt.unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!("Inference panicked: {message}");
                        Err(ClassifyError::Internal(format!(
                            "inference panicked: {message}"
                        )))
                    });
                    if let Err(e) = &result {
                        warn!(kind = e.kind(), "Inference error: {e}");
                    }
                    // Caller may have gone away
                    let _ = reply.send(result);
                }
            }
        }
    });

    (InferenceHandle { tx }, join)
}
