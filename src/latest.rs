//! Sequence-tagged slot for results of concurrent fetches.
//!
//! Every request is issued a [`Ticket`] carrying a monotonically increasing
//! number. A completion is applied only if its ticket is newer than the one
//! that last wrote the slot, so a slow response can never overwrite a newer
//! one. [`LatestSlot::close`] invalidates all outstanding tickets, which is
//! how a torn-down view stops late completions from mutating it.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn seq(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct LatestSlot<T> {
    issued: u64,
    applied: u64,
    value: Option<T>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            issued: 0,
            applied: 0,
            value: None,
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    /// Whether a completion carrying `ticket` would still be applied.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 > self.applied && ticket.0 <= self.issued
    }

    /// Whether any issued ticket is still unresolved and newer than the value.
    pub fn is_pending(&self) -> bool {
        self.issued > self.applied
    }

    /// Store `value` if `ticket` is current. Returns whether it was applied.
    pub fn resolve(&mut self, ticket: Ticket, value: Option<T>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.applied = ticket.0;
        self.value = value;
        true
    }

    /// Drop the value and invalidate every outstanding ticket.
    pub fn close(&mut self) {
        self.applied = self.issued;
        self.value = None;
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}
