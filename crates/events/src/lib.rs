//! Event primitives shared by the domain and infrastructure layers.
//!
//! Audit events for stocktaking transitions are published through an
//! [`EventBus`]; the in-memory bus backs tests and single-process setups.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::{TenantScoped, for_tenant};
