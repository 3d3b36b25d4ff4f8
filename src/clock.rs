//! Lamport logical clock.

/// Logical timestamp carried by every protocol message.
pub type Timestamp = u64;

/// Received timestamps must stay below this. The gap up to `u64::MAX` is
/// left for local ticks, so the clock can never wrap.
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as Timestamp;

/// Process-local Lamport clock.
///
/// Only two operations advance it, and both return the new value, so every
/// locally generated event gets a distinct timestamp that is greater than
/// anything observed before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock(Timestamp);

impl LamportClock {
    pub fn new() -> Self {
        Self(0)
    }

    /// Current value, without advancing. Never use this to stamp an event.
    pub fn current(&self) -> Timestamp {
        self.0
    }

    /// Local event: advance by exactly one.
    pub fn tick(&mut self) -> Timestamp {
        self.0 += 1;
        self.0
    }

    /// Receive event: jump past `received` if it is ahead, otherwise tick.
    ///
    /// Returns `None`, leaving the clock untouched, when `received` is not
    /// below [`MAX_TIMESTAMP`].
    pub fn observe(&mut self, received: Timestamp) -> Option<Timestamp> {
        if received >= MAX_TIMESTAMP {
            return None;
        }
        if received >= self.0 {
            self.0 = received + 1;
            Some(self.0)
        } else {
            Some(self.tick())
        }
    }
}
