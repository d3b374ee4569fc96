use oppflow_core::event::{EventSink, PipelineEvent, TracingSink};
use oppflow_core::{Engine, OppflowError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::AppError;

/// Logs every event, then fans it out to SSE subscribers.
///
/// A send with no subscribers fails; that is the normal idle state.
pub struct BroadcastSink {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: PipelineEvent) {
        TracingSink.emit(event.clone());
        let _ = self.tx.send(event);
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub engine: Arc<Engine>,
    pub event_tx: broadcast::Sender<PipelineEvent>,
}

impl AppState {
    /// Open the project at `root` with events routed to the broadcast channel.
    pub fn open(root: &Path) -> oppflow_core::Result<Self> {
        let engine = Engine::open(root)?;
        Ok(Self::with_engine(root.to_path_buf(), engine))
    }

    /// Wrap an already configured engine; its event sink is replaced.
    pub fn with_engine(root: PathBuf, engine: Engine) -> Self {
        let (tx, _) = broadcast::channel(256);
        let sink = BroadcastSink { tx: tx.clone() };
        Self {
            root,
            engine: Arc::new(engine.with_events(Arc::new(sink))),
            event_tx: tx,
        }
    }

    /// Run a synchronous engine call on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> Result<T, OppflowError> + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?
            .map_err(AppError::from)
    }
}
