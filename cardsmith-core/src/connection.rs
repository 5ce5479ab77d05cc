//! Guaranteed-release card connection.

use cardsmith_io::{CardHandle, HwError};
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// A connected card. Closing happens on drop, on every exit path:
/// success, error, or the owning future being dropped mid-operation.
/// A failing close is logged and suppressed.
pub struct ConnectedCard<'a, C: CardHandle + ?Sized> {
    card: &'a mut C,
    role: &'static str,
}

impl<'a, C: CardHandle + ?Sized> ConnectedCard<'a, C> {
    pub async fn open(card: &'a mut C, role: &'static str) -> Result<Self, HwError> {
        // Built before connecting so a half-open link is still closed.
        let guard = Self { card, role };
        guard.card.connect().await?;
        debug!(role, "card connected");
        Ok(guard)
    }
}

impl<C: CardHandle + ?Sized> Deref for ConnectedCard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.card
    }
}

impl<C: CardHandle + ?Sized> DerefMut for ConnectedCard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.card
    }
}

impl<C: CardHandle + ?Sized> Drop for ConnectedCard<'_, C> {
    fn drop(&mut self) {
        match self.card.close() {
            Ok(()) => debug!(role = self.role, "card closed"),
            Err(e) => warn!(role = self.role, "ignoring close failure: {}", e),
        }
    }
}
