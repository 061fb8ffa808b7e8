pub mod builder;
pub mod interface;
pub mod registry;
pub mod typed;

pub use builder::{InterfaceBuilder, InterfaceConfig, Role, Side, SlotMode};
pub use interface::MessageInterface;
pub use registry::InterfaceRegistry;
pub use typed::{ConsumeGuard, ProduceGuard, TypedInterface};

pub mod Slot {
    pub mod Slot;
    pub mod Slot_impl;
    pub mod layout;
    pub use Slot::{SlotState, SlotView, POLL_INTERVAL}; // re-export for stable path
}

pub mod Structs {
    pub mod Message_Structs;
    pub mod Payload_Structs;
    pub use Message_Structs::{Message, SlotLayout}; // re-export for stable path
    pub use Payload_Structs::{AbrAction, AbrObservation, UeAction, UeObservation};
}
