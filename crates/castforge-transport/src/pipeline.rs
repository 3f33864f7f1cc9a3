//! Ordered, named outbound stages for one connection.
//!
//! A [`Pipeline`] is a list of [`Stage`]s. Every outbound value is handed
//! to the first stage, whose output goes to the next, and so on. A stage
//! can transform the value, pass it through untouched, or swallow it.
//!
//! ```text
//! write(M) ──→ [stage a] ──→ [stage b] ──→ [stage c] ──→ Some(M) / None
//! ```
//!
//! Stages are addressed by name, so a component can slot itself in at a
//! fixed position relative to another (`add_before("transport-encoder",
//! ...)`) and later take itself out again without knowing what else is
//! installed.
//!
//! Connection-level [`ConnectionEvent`]s are broadcast to every stage in
//! order.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::TransportError;

// ---------------------------------------------------------------------------
// ConnectionEvent
// ---------------------------------------------------------------------------

/// Something that happened to the connection that stages may care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection switched to compressed framing.
    CompressionEnabled {
        /// Payloads at or above this size are deflated.
        threshold: usize,
    },
    /// The connection switched back to plain framing.
    CompressionDisabled,
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of an outbound [`Pipeline`].
///
/// Stages are shared (`&self`): any per-connection state a stage keeps
/// must use interior mutability.
pub trait Stage<M>: Send + Sync + 'static {
    /// The error a failing write reports.
    type Error;

    /// Handles one outbound value.
    ///
    /// Return `Ok(Some(value))` to pass a (possibly different) value on,
    /// or `Ok(None)` to stop it here.
    fn write(&self, message: M) -> Result<Option<M>, Self::Error>;

    /// Reacts to a connection event. The default ignores it.
    fn event(&self, _event: &ConnectionEvent) {}
}

struct Entry<M, E> {
    name: String,
    stage: Arc<dyn Stage<M, Error = E>>,
    // The same stage, kept as `Any` for typed lookups.
    any: Arc<dyn Any + Send + Sync>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered chain of named stages sharing one message type `M` and one
/// error type `E`.
pub struct Pipeline<M, E> {
    entries: Vec<Entry<M, E>>,
}

impl<M: 'static, E: 'static> Pipeline<M, E> {
    /// Creates an empty pipeline. Writes pass straight through.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Installs `stage` at the head of the pipeline.
    ///
    /// # Errors
    /// [`TransportError::DuplicateStage`] if `name` is taken.
    pub fn add_first<S>(&mut self, name: &str, stage: Arc<S>) -> Result<(), TransportError>
    where
        S: Stage<M, Error = E>,
    {
        self.insert_at(0, name, stage)
    }

    /// Installs `stage` at the tail of the pipeline.
    ///
    /// # Errors
    /// [`TransportError::DuplicateStage`] if `name` is taken.
    pub fn add_last<S>(&mut self, name: &str, stage: Arc<S>) -> Result<(), TransportError>
    where
        S: Stage<M, Error = E>,
    {
        self.insert_at(self.entries.len(), name, stage)
    }

    /// Installs `stage` right before the stage named `anchor`.
    ///
    /// # Errors
    /// [`TransportError::StageNotFound`] if there's no `anchor`,
    /// [`TransportError::DuplicateStage`] if `name` is taken.
    pub fn add_before<S>(
        &mut self,
        anchor: &str,
        name: &str,
        stage: Arc<S>,
    ) -> Result<(), TransportError>
    where
        S: Stage<M, Error = E>,
    {
        let index = self.position(anchor)?;
        self.insert_at(index, name, stage)
    }

    /// Installs `stage` right after the stage named `anchor`.
    ///
    /// # Errors
    /// [`TransportError::StageNotFound`] if there's no `anchor`,
    /// [`TransportError::DuplicateStage`] if `name` is taken.
    pub fn add_after<S>(
        &mut self,
        anchor: &str,
        name: &str,
        stage: Arc<S>,
    ) -> Result<(), TransportError>
    where
        S: Stage<M, Error = E>,
    {
        let index = self.position(anchor)?;
        self.insert_at(index + 1, name, stage)
    }

    /// Removes the stage named `name`.
    ///
    /// # Errors
    /// [`TransportError::StageNotFound`] if there's no such stage.
    pub fn remove(&mut self, name: &str) -> Result<(), TransportError> {
        let index = self.position(name)?;
        self.entries.remove(index);
        Ok(())
    }

    /// Returns `true` if a stage named `name` is installed.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Stage names, head first.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Returns the stage named `name` if it is an `S`.
    pub fn get<S>(&self, name: &str) -> Option<Arc<S>>
    where
        S: Stage<M, Error = E>,
    {
        let entry = self.entries.iter().find(|entry| entry.name == name)?;
        Arc::clone(&entry.any).downcast::<S>().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Threads `message` through every stage, head first.
    ///
    /// Returns `Ok(None)` as soon as a stage swallows the value.
    ///
    /// # Errors
    /// The first stage error, unchanged. Later stages don't run.
    pub fn write(&self, mut message: M) -> Result<Option<M>, E> {
        for entry in &self.entries {
            match entry.stage.write(message)? {
                Some(next) => message = next,
                None => {
                    tracing::trace!(stage = %entry.name, "outbound value consumed");
                    return Ok(None);
                }
            }
        }
        Ok(Some(message))
    }

    /// Delivers `event` to every stage, head first.
    pub fn fire_event(&self, event: &ConnectionEvent) {
        for entry in &self.entries {
            entry.stage.event(event);
        }
    }

    fn position(&self, name: &str) -> Result<usize, TransportError> {
        self.entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| TransportError::StageNotFound(name.to_string()))
    }

    fn insert_at<S>(&mut self, index: usize, name: &str, stage: Arc<S>) -> Result<(), TransportError>
    where
        S: Stage<M, Error = E>,
    {
        if self.contains(name) {
            return Err(TransportError::DuplicateStage(name.to_string()));
        }
        let any: Arc<dyn Any + Send + Sync> = stage.clone();
        self.entries.insert(
            index,
            Entry {
                name: name.to_string(),
                stage,
                any,
            },
        );
        Ok(())
    }
}

impl<M: 'static, E: 'static> Default for Pipeline<M, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, E> fmt::Debug for Pipeline<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| &entry.name))
            .finish()
    }
}
