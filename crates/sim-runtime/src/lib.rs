#![deny(warnings)]

//! Actor runtime for the phone market: a broadcast bus topic, the market
//! clearinghouse, the pricing firms and their upstream component suppliers.
//! Each actor is an independent sequential task owning private state;
//! nothing is shared between instances except the messages on the topic.

pub mod bus;
pub mod clearinghouse;
pub mod firm;
pub mod supplier;

pub use bus::Topic;
pub use clearinghouse::Clearinghouse;
pub use firm::FirmPricingEngine;
pub use supplier::SupplierEngine;

/// Opaque scheduler signal; one tick is one simulation step.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tick;
