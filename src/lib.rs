// Module naming follows project convention (Core = memory substrate, Exchange = slot handoff)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Exchange;
#[allow(non_snake_case)]
pub mod Control;
#[allow(non_snake_case)]
pub mod ABR;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod ffi;

pub use error::{Error, Result};
pub use Exchange::{
    InterfaceBuilder, InterfaceConfig, InterfaceRegistry, MessageInterface, Role, Side, SlotMode,
    TypedInterface,
};
pub use Exchange::Structs::{AbrAction, AbrObservation, Message, SlotLayout, UeAction, UeObservation};
