//! Protocol stack: CAN frames and ISO-TP framing at the bottom, the
//! pass-through device (channels, filters, scheduler, dispatcher) on top.
pub mod passthru;
pub mod transport;
