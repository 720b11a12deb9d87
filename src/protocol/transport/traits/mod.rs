//! Abstraction traits used by the transport layer (CAN link halves and clock).
pub mod can_link;
pub mod link_clock;
