//! Quiet-period coalescing for change notifications.

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// One pending deadline plus a dirty flag.
///
/// Two flavors cover both notification styles: a trailing instance pushes
/// its deadline out on every poke, a settle instance keeps the deadline
/// armed by the first poke of a burst.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    resets: bool,
    deadline: Option<Instant>,
    dirty: bool,
}

impl Debounce {
    /// Trailing debounce: every poke restarts the window, so the fire
    /// lands after a full quiet period.
    pub fn trailing(window: Duration) -> Self {
        Self {
            window,
            resets: true,
            deadline: None,
            dirty: false,
        }
    }

    /// Settle window: the first poke arms the deadline; later pokes only
    /// mark it dirty.
    pub fn settle(window: Duration) -> Self {
        Self {
            window,
            resets: false,
            deadline: None,
            dirty: false,
        }
    }

    /// Marks the debouncer dirty and arms (or restarts) its deadline.
    pub fn poke(&mut self) {
        self.dirty = true;
        if self.resets || self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes; pends forever while
    /// disarmed, so it can sit in a `select!` arm.
    pub async fn ready(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }

    /// Disarms and reports whether a fire is due. Call after `ready()`
    /// resolves.
    pub fn take(&mut self) -> bool {
        let fire = self.dirty;
        self.dirty = false;
        self.deadline = None;
        fire
    }
}
