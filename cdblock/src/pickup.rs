//! Pickup (read head) arbitration.
//!
//! There is one pickup and many readers. Ownership is a plain token: the
//! first requester gets it, later requesters get `Busy` and try again on a
//! later tick. Nothing here blocks.

use crate::error::{CdBlockError, Result};
use crate::filter::SectorWindow;
use crate::types::{Fad, UserId};

/// Outcome of a successful seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekGrant {
    /// Caller owns the pickup and must start the seek
    Granted,
    /// Pickup is already headed over the requested sector; nothing to do
    AlreadyCovered,
}

/// Single-owner token for the read head.
#[derive(Debug, Clone)]
pub struct PickupArbiter {
    owner: Option<UserId>,
    target: Option<SectorWindow>,
    waited: u32,
    budget: u32,
}

impl PickupArbiter {
    /// Create an arbiter that times out seeks after `budget` ticks without progress
    pub fn new(budget: u32) -> Self {
        Self {
            owner: None,
            target: None,
            waited: 0,
            budget,
        }
    }

    /// Ask for the pickup to read `count` sectors from `target`.
    pub fn request_seek(&mut self, target: Fad, count: u32, requester: UserId) -> Result<SeekGrant> {
        if self.target.is_some_and(|w| w.contains(target)) {
            return Ok(SeekGrant::AlreadyCovered);
        }
        match self.owner {
            Some(owner) if owner != requester => Err(CdBlockError::Busy),
            _ => {
                self.owner = Some(requester);
                self.target = Some(SectorWindow::new(target, count.max(1)));
                self.waited = 0;
                Ok(SeekGrant::Granted)
            }
        }
    }

    /// Give the pickup back. Returns false if `user` did not hold it.
    pub fn release(&mut self, user: UserId) -> bool {
        if self.owner != Some(user) {
            return false;
        }
        self.owner = None;
        self.target = None;
        self.waited = 0;
        true
    }

    /// Reset the timeout counter after the drive delivered data
    pub fn note_progress(&mut self) {
        self.waited = 0;
    }

    /// Account `elapsed_ticks` without progress.
    ///
    /// Returns `Timeout` once the owner has waited longer than the budget.
    pub fn check_timeout(&mut self, elapsed_ticks: u32) -> Result<()> {
        if self.owner.is_none() {
            return Ok(());
        }
        self.waited = self.waited.saturating_add(elapsed_ticks);
        if self.waited > self.budget {
            return Err(CdBlockError::Timeout);
        }
        Ok(())
    }

    /// Current owner
    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// Window the owner is reading
    pub fn target(&self) -> Option<SectorWindow> {
        self.target
    }

    /// Ticks waited since the last progress
    pub fn waited(&self) -> u32 {
        self.waited
    }

    /// Timeout budget in ticks
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Drop ownership unconditionally
    pub fn reset(&mut self) {
        self.owner = None;
        self.target = None;
        self.waited = 0;
    }
}
