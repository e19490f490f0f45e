//! Client side of the John DAO voting canister.
//!
//! [`Agent`] is the transport contract and [`HttpAgent`] its HTTP gateway
//! implementation. [`Actor`] binds a canister id to a caller identity and
//! exposes the canister's methods with typed arguments and replies.

mod actor;
mod agent;

pub use actor::{Actor, CallResult};
pub use agent::{Agent, AgentError, CallKind, HttpAgent, REQUEST_DOMAIN_SEPARATOR};
