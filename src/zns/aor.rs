//! Active and Open Resources (AOR) accounting.
//!
//! Tracks how many zones are active (open or closed) and open against the
//! configured maxima. A maximum of 0 means unlimited.
//!
//! [`AorAccountant::check`] is the only admission gate; the increment and
//! decrement operations are unconditional. Callers pair a successful check
//! with exactly the matching increments, and pair every decrement with the
//! transition that vacates the open/active status.

use serde::Serialize;

use crate::error::ZoneError;

/// Namespace-scoped active/open counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AorAccountant {
    max_active: u32,
    max_open: u32,
    active: u32,
    open: u32,
}

impl AorAccountant {
    pub fn new(max_active: u32, max_open: u32) -> Self {
        Self {
            max_active,
            max_open,
            active: 0,
            open: 0,
        }
    }

    /// Check whether `act` more active and `opn` more open zones fit.
    pub fn check(&self, act: u32, opn: u32) -> Result<(), ZoneError> {
        if self.max_active != 0 && self.active + act > self.max_active {
            tracing::debug!(max_active = self.max_active, "insufficient active resources");
            return Err(ZoneError::TooManyActive {
                max_active: self.max_active,
            });
        }
        if self.max_open != 0 && self.open + opn > self.max_open {
            tracing::debug!(max_open = self.max_open, "insufficient open resources");
            return Err(ZoneError::TooManyOpen {
                max_open: self.max_open,
            });
        }
        Ok(())
    }

    pub fn inc_active(&mut self) {
        self.active += 1;
        debug_assert!(
            self.max_active == 0 || self.active <= self.max_active,
            "active count {} exceeds limit {}",
            self.active,
            self.max_active
        );
    }

    pub fn dec_active(&mut self) {
        debug_assert!(self.active > 0, "active count underflow");
        self.active -= 1;
        debug_assert!(
            self.active >= self.open,
            "active count {} below open count {}",
            self.active,
            self.open
        );
    }

    pub fn inc_open(&mut self) {
        self.open += 1;
        debug_assert!(
            self.max_open == 0 || self.open <= self.max_open,
            "open count {} exceeds limit {}",
            self.open,
            self.max_open
        );
    }

    pub fn dec_open(&mut self) {
        debug_assert!(self.open > 0, "open count underflow");
        self.open -= 1;
    }

    pub fn active(&self) -> u32 {
        self.active
    }

    pub fn open(&self) -> u32 {
        self.open
    }

    pub fn max_active(&self) -> u32 {
        self.max_active
    }

    pub fn max_open(&self) -> u32 {
        self.max_open
    }

    /// Counters satisfy the configured maxima.
    pub fn within_limits(&self) -> bool {
        (self.max_active == 0 || self.active <= self.max_active)
            && (self.max_open == 0 || self.open <= self.max_open)
    }
}
