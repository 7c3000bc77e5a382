//! `rcc-middleware` – transport layer of the joint-control client stack.
//!
//! - [`transport`] – the traits command clients are written against.
//! - [`bus`] – the in-process, topic-partitioned [`ActionBus`].
//! - [`comm_state`] – per-goal client comm state tracking.
//! - [`bus_transport`] – [`BusTransport`], the client side over the bus.
//! - [`sim_server`] – [`SimActionServer`], simulated servers for demos and tests.

pub mod bus;
pub mod bus_transport;
pub mod comm_state;
pub mod sim_server;
pub mod transport;

pub use bus::{ActionBus, Topic, TopicReceiver};
pub use bus_transport::BusTransport;
pub use comm_state::CommStateMachine;
pub use sim_server::{GoalContext, GoalExecutor, SimActionServer, SimServerBuilder, Verdict};
pub use transport::{
    ActionHandle, ActionTransport, GoalHandle, GoalObserver, JointStateCallback, Subscription,
    TopicTransport,
};
