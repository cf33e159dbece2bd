//! Client session to the backing store.
//!
//! A [`Session`] is opened once and shared (behind an `Arc`) by every engine
//! that talks to the same backend. Opening pings the backend within the
//! configured connect timeout; [`Session::shutdown`] closes the backend, after
//! which every call made through the session fails with `EngineUnavailable`.
//! Engine calls go through [`Session::keep_alive`], which re-pings the backend
//! once the keep-alive interval has passed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::error::{RagStoreError, Result};
use crate::vector::backend::VectorBackend;

/// Shared handle to a backend.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    backend: Arc<dyn VectorBackend>,
    config: ConnectionConfig,
    last_ping: Mutex<Instant>,
    closed: AtomicBool,
}

impl Session {
    /// Open a session, failing with `EngineUnavailable` when the backend does
    /// not answer a ping within the connect timeout.
    pub fn open(config: &ConnectionConfig, backend: Arc<dyn VectorBackend>) -> Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let timeout = config.connect_timeout();
        ping_within(&backend, timeout)?;

        info!(
            "session {id} opened (token auth: {})",
            if config.token.is_some() { "on" } else { "off" }
        );
        Ok(Arc::new(Session {
            id,
            backend,
            config: config.clone(),
            last_ping: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// When the backend last answered a ping.
    pub fn last_ping(&self) -> Instant {
        *self.last_ping.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The backend, or `EngineUnavailable` once the session is shut down.
    pub fn backend(&self) -> Result<&dyn VectorBackend> {
        if self.is_closed() {
            return Err(RagStoreError::unavailable(format!(
                "session {} is shut down",
                self.id
            )));
        }
        Ok(self.backend.as_ref())
    }

    /// Re-ping the backend if the keep-alive interval has elapsed since the
    /// last successful ping. Returns whether a ping was sent.
    pub fn keep_alive(&self) -> Result<bool> {
        let backend = self.backend()?;
        let mut last_ping = self.last_ping.lock();
        if last_ping.elapsed() < self.config.keep_alive() {
            return Ok(false);
        }
        backend.ping().map_err(|e| {
            warn!("session {}: keep-alive ping failed: {e}", self.id);
            e.into_engine_error()
        })?;
        *last_ping = Instant::now();
        debug!("session {}: keep-alive ping", self.id);
        Ok(true)
    }

    /// Close the backend. Later calls through this session fail; shutting
    /// down twice is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("session {} shutting down", self.id);
        self.backend.close().map_err(RagStoreError::into_engine_error)
    }
}

fn ping_within(backend: &Arc<dyn VectorBackend>, timeout: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let backend = Arc::clone(backend);
    thread::Builder::new()
        .name("ragstore-connect".to_string())
        .spawn(move || {
            let _ = tx.send(backend.ping());
        })
        .map_err(|e| RagStoreError::unavailable(format!("cannot spawn connect thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(RagStoreError::into_engine_error),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(RagStoreError::unavailable(format!(
            "backend did not answer within {} ms",
            timeout.as_millis()
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RagStoreError::unavailable(
            "connect thread exited without answering",
        )),
    }
}
