use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::Exchange::builder::InterfaceConfig;
use crate::Exchange::interface::MessageInterface;
use crate::Exchange::typed::TypedInterface;
use crate::Exchange::Structs::Message_Structs::{Message, SlotLayout};

#[derive(Default)]
struct RegistryState {
    config: Option<InterfaceConfig>,
    interface: Option<Arc<MessageInterface>>,
    /// A create-or-attach is running outside the state lock.
    opening: bool,
    bound: Vec<bool>,
}

/// Owns the message interface of one participant.
///
/// Configure once, then the first call to [`interface`](Self::interface) or
/// [`bind`](Self::bind) creates or attaches the region. The registry is an
/// ordinary value passed by reference, so one test process may hold several.
///
/// First use can block for as long as an attacher waits for its creator.
/// That wait holds only the `opening` lock, so `is_initialized` and
/// `configure` still answer from other threads meanwhile.
#[derive(Default)]
pub struct InterfaceRegistry {
    state: Mutex<RegistryState>,
    /// Serialises first use; always taken before `state`.
    opening: Mutex<()>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InterfaceConfig) -> Self {
        let registry = Self::new();
        registry.state.lock().config = Some(config);
        registry
    }

    /// Set the configuration. Allowed any number of times before first use,
    /// a `ConfigurationError` afterwards or while first use is in progress.
    pub fn configure(&self, config: InterfaceConfig) -> Result<()> {
        let mut state = self.state.lock();
        if state.interface.is_some() || state.opening {
            return Err(Error::config(
                "interface already in use; configuration is frozen",
            ));
        }
        state.config = Some(config);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().interface.is_some()
    }

    /// The interface, created or attached on first access.
    pub fn interface(&self) -> Result<Arc<MessageInterface>> {
        if let Some(interface) = &self.state.lock().interface {
            return Ok(Arc::clone(interface));
        }

        let _opening = self.opening.lock();
        let config = {
            let mut state = self.state.lock();
            if let Some(interface) = &state.interface {
                return Ok(Arc::clone(interface));
            }
            let config = state
                .config
                .clone()
                .ok_or_else(|| Error::config("interface used before it was configured"))?;
            state.opening = true;
            config
        };

        let slots = config.slot_count();
        let opened = MessageInterface::create_or_attach(config);

        let mut state = self.state.lock();
        state.opening = false;
        let interface = Arc::new(opened?);
        state.bound = vec![false; slots];
        state.interface = Some(Arc::clone(&interface));
        Ok(interface)
    }

    /// Bind `slot` to the `(O, A)` pair. Each slot can be bound once.
    pub fn bind<O: Message, A: Message>(&self, slot: usize) -> Result<TypedInterface<O, A>> {
        let interface = self.interface()?;
        let mut state = self.state.lock();

        let already = state.bound.get(slot).copied().ok_or_else(|| {
            Error::config(format!("slot {} out of range ({} slots)", slot, interface.slot_count()))
        })?;
        if already {
            return Err(Error::config(format!("slot {} is already bound", slot)));
        }

        let typed = TypedInterface::<O, A>::bind(interface, slot)?;
        state.bound[slot] = true;
        debug!(slot, layout = ?SlotLayout::of::<O, A>(), "bound slot");
        Ok(typed)
    }
}
