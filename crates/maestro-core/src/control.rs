//! Thread-safe control surface.
//!
//! Writers serialize on a mutex, copy the published [`Settings`], mutate the
//! copy and swap it in. The render side loads the current value through
//! `ArcSwap` and publishes its snapshots with `try_lock`, so it never waits on
//! the control side.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::conductor::ConductorState;
use crate::error::Result;
use crate::settings::Settings;
use crate::style::Style;

pub(crate) struct Shared {
    writer: Mutex<()>,
    pub(crate) settings: ArcSwap<Settings>,
    pub(crate) board: Mutex<Option<ConductorState>>,
}

/// Settings as of now plus the last snapshot the render side published
#[derive(Debug, Clone, Copy)]
pub struct Status {
    pub settings: Settings,
    pub snapshot: Option<ConductorState>,
}

/// Cloneable handle used by the control layer to steer a session
#[derive(Clone)]
pub struct ConductorHandle {
    pub(crate) shared: Arc<Shared>,
}

impl Default for ConductorHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl ConductorHandle {
    pub fn new(initial: Settings) -> Self {
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(()),
                settings: ArcSwap::from_pointee(initial),
                board: Mutex::new(None),
            }),
        }
    }

    fn update<F>(&self, mutate: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let _writer = self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = **self.shared.settings.load();
        mutate(&mut next)?;
        Ok(self.commit(next))
    }

    /// Infallible form of `update`
    fn modify(&self, mutate: impl FnOnce(&mut Settings)) -> Settings {
        let _writer = self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = **self.shared.settings.load();
        mutate(&mut next);
        self.commit(next)
    }

    /// Caller holds the writer lock
    fn commit(&self, mut next: Settings) -> Settings {
        next.revision += 1;
        self.shared.settings.store(Arc::new(next));
        next
    }

    /// Switch style, resetting layers, effect levels and sustain to its preset
    pub fn apply_style(&self, name: &str) -> Result<Style> {
        let style = Style::parse(name)?;
        self.modify(|s| s.apply_style(style));
        info!("Style applied: {}", style);
        Ok(style)
    }

    pub fn set_param(&self, name: &str, value: &str) -> Result<()> {
        self.update(|s| s.set_param(name, value))?;
        debug!("{} = {}", name, value);
        Ok(())
    }

    /// Leave setup silence. Idempotent.
    pub fn start(&self) {
        let settings = self.modify(|s| s.started = true);
        info!(revision = settings.revision, "Session started");
    }

    /// Request the outro. Returns false, changing nothing, if one was already requested.
    pub fn trigger_outro(&self) -> bool {
        let _writer = self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = **self.shared.settings.load();
        if next.outro_requested {
            debug!("Outro already requested, ignoring");
            return false;
        }
        next.outro_requested = true;
        self.commit(next);
        info!("Outro requested");
        true
    }

    pub fn settings(&self) -> Settings {
        **self.shared.settings.load()
    }

    pub fn status(&self) -> Status {
        let snapshot = *self.shared.board.lock().unwrap_or_else(PoisonError::into_inner);
        Status {
            settings: self.settings(),
            snapshot,
        }
    }
}
