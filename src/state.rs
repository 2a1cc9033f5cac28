// src/state.rs

//! The client lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the client. `Creating` and `Bootstrapping` occur once, at
/// construction; afterwards the client oscillates between `Resetting` and
/// `Healthy` for its whole life. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Creating = 0,
    Bootstrapping = 1,
    Resetting = 2,
    Healthy = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Creating,
            1 => ClientState::Bootstrapping,
            2 => ClientState::Resetting,
            _ => ClientState::Healthy,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Creating => "Creating",
            ClientState::Bootstrapping => "Bootstrapping",
            ClientState::Resetting => "Resetting",
            ClientState::Healthy => "Healthy",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding the current `ClientState`.
///
/// The `Resetting` entry check is a compare-exchange so the "already
/// resetting, skip" guard holds under truly concurrent triggers.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: ClientState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, next: ClientState) {
        self.0.store(next as u8, Ordering::Release);
    }

    /// Attempts to enter `Resetting`. Returns `false` when a reset is
    /// already in flight, collapsing concurrent triggers into a single
    /// in-flight cycle.
    pub fn try_enter_resetting(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == ClientState::Resetting as u8 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                ClientState::Resetting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
