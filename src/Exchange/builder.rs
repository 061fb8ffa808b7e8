use std::time::Duration;

use crate::error::{Error, Result};
use crate::Exchange::Slot::layout::MAX_SLOTS;
use crate::Exchange::Structs::Message_Structs::{Message, SlotLayout};

pub const DEFAULT_SHARED_NAME: &str = "dmxp_simbridge";
pub const SHARED_NAME_ENV: &str = "DMXP_SIMBRIDGE_SHM";

/// Which process allocates the region. Must be opposite in the two processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Attacher,
}

/// Which half of the ping-pong a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Writes observations, reads actions.
    Simulation,
    /// Reads observations, writes actions.
    Decision,
}

impl Side {
    pub(crate) fn index(self) -> usize {
        match self {
            Side::Simulation => 0,
            Side::Decision => 1,
        }
    }
}

/// Scalar mode carries exactly one slot; vector mode carries one or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    Scalar,
    Vector,
}

/// Everything needed to create or attach a message interface.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub role: Role,
    pub side: Side,
    pub mode: SlotMode,
    pub handle_finish: bool,
    pub shared_name: String,
    /// Default bound on every blocking `begin_*`; `None` blocks until the
    /// peer answers, finishes or dies.
    pub exchange_timeout: Option<Duration>,
    /// How long an attacher waits for the creator; `None` waits forever.
    pub attach_timeout: Option<Duration>,
    pub layouts: Vec<SlotLayout>,
}

impl InterfaceConfig {
    pub fn builder() -> InterfaceBuilder {
        InterfaceBuilder::default()
    }

    pub fn slot_count(&self) -> usize {
        self.layouts.len()
    }
}

pub struct InterfaceBuilder {
    role: Role,
    side: Side,
    mode: SlotMode,
    handle_finish: bool,
    shared_name: String,
    exchange_timeout: Option<Duration>,
    attach_timeout: Option<Duration>,
    layouts: Vec<SlotLayout>,
}

impl Default for InterfaceBuilder {
    fn default() -> Self {
        Self {
            role: Role::Creator,
            side: Side::Simulation,
            mode: SlotMode::Scalar,
            handle_finish: true,
            shared_name: DEFAULT_SHARED_NAME.to_owned(),
            exchange_timeout: None,
            attach_timeout: None,
            layouts: Vec::new(),
        }
    }
}

impl InterfaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose shared name comes from `DMXP_SIMBRIDGE_SHM` when set.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        if let Ok(name) = std::env::var(SHARED_NAME_ENV) {
            if !name.is_empty() {
                builder.shared_name = name;
            }
        }
        builder
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Override the slot mode. Call after `slots`, which selects vector mode.
    pub fn mode(mut self, mode: SlotMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn handle_finish(mut self, handle_finish: bool) -> Self {
        self.handle_finish = handle_finish;
        self
    }

    pub fn shared_name(mut self, name: impl Into<String>) -> Self {
        self.shared_name = name.into();
        self
    }

    pub fn exchange_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn attach_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// One slot carrying `(O, A)`.
    pub fn scalar<O: Message, A: Message>(mut self) -> Self {
        self.mode = SlotMode::Scalar;
        self.layouts = vec![SlotLayout::of::<O, A>()];
        self
    }

    /// `count` slots, all carrying `(O, A)`.
    pub fn vector<O: Message, A: Message>(mut self, count: usize) -> Self {
        self.mode = SlotMode::Vector;
        self.layouts = vec![SlotLayout::of::<O, A>(); count];
        self
    }

    /// Vector mode with an explicit layout per slot; slots may carry
    /// different message pairs.
    pub fn slots(mut self, layouts: Vec<SlotLayout>) -> Self {
        self.mode = SlotMode::Vector;
        self.layouts = layouts;
        self
    }

    pub fn build(self) -> Result<InterfaceConfig> {
        if self.layouts.is_empty() {
            return Err(Error::config("interface needs at least one slot"));
        }
        if self.layouts.len() > MAX_SLOTS {
            return Err(Error::config(format!(
                "{} slots requested, at most {} supported",
                self.layouts.len(),
                MAX_SLOTS
            )));
        }
        if self.mode == SlotMode::Scalar && self.layouts.len() != 1 {
            return Err(Error::config("scalar mode carries exactly one slot"));
        }
        if let Some(bad) = self.layouts.iter().position(|l| !l.is_well_formed()) {
            return Err(Error::config(format!("slot {} has a non power-of-two alignment", bad)));
        }
        if self.shared_name.is_empty() || self.shared_name.contains('/') {
            return Err(Error::config(format!("invalid shared name {:?}", self.shared_name)));
        }

        Ok(InterfaceConfig {
            role: self.role,
            side: self.side,
            mode: self.mode,
            handle_finish: self.handle_finish,
            shared_name: self.shared_name,
            exchange_timeout: self.exchange_timeout,
            attach_timeout: self.attach_timeout,
            layouts: self.layouts,
        })
    }
}
