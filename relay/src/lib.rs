//! Session-scoped JSON-RPC relay in front of data, payment and notification
//! backends.
//!
//! A [`SessionHost`] owns sessions and hands raw messages to the
//! [`RpcDispatcher`], which resolves tools from the [`CapabilityRegistry`] and
//! brings up backend adapters lazily through the [`LazyInitializer`].

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod host;
pub mod lazy_init;
pub mod registry;
pub mod rpc;
pub mod schema;
pub mod session;
pub mod store;
pub mod tools;

pub use adapters::{AdapterFactory, AdapterId, BackendAdapter, HttpAdapterFactory};
pub use config::{BackendSettings, SessionConfig};
pub use dispatcher::{DispatcherOptions, RpcDispatcher};
pub use errors::{RelayError, Result};
pub use host::{HostReply, SessionHost, SessionScope};
pub use lazy_init::LazyInitializer;
pub use registry::{CapabilityDescriptor, CapabilityRegistry, CapabilitySummary, Handler, HandlerFuture};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use session::{AdapterState, SerializedSession, Session, SessionId, SessionPhase, SessionStatus};
pub use store::{MemorySessionStore, SessionStore};
pub use tools::default_registry;
