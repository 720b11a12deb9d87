//! `korri-isotp` library: ISO 15765-2 (ISO-TP) transport engine behind a
//! pass-through diagnostic API, in a `no_std` + `alloc` environment. The crate
//! exposes the configuration layer, the error types, the CAN/ISO-TP transport
//! primitives and the pass-through device with its two runner futures.
#![no_std]

extern crate alloc;

/// Device and channel configuration (bus speeds, ioctl-style parameters).
pub mod config;
/// Errors for identifier construction, wire decoding, segmentation and the
/// pass-through API.
pub mod error;
/// CAN/ISO-TP transport and the pass-through device built on it.
pub mod protocol;
