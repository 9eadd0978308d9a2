//! Hand-maintained subset of the generated message catalog.
//!
//! The full catalog is produced by the schema generator and spans thousands
//! of types; this subset carries the messages the core itself depends on
//! (control ping and its reply) plus representative types covering every
//! wire-layout rule: empty requests, replies with a return value, dump and
//! details pairs, event-style requests, and counter messages with
//! variable-length arrays.

pub mod control;
pub mod interfaces;
pub mod stats;
