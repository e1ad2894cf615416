//! # mirkobot-channels
//!
//! Long-lived mirkoczat channel connections: one [`ChannelSession`] per
//! joined channel, owned by a [`ConnectionSupervisor`] that sweeps for dead
//! sessions and rejoins them. Inbound chat traffic is re-published on the bus
//! under `channel::<name>::...` topics.

pub mod backoff;
pub mod inbound;
pub mod link;
pub mod mock;
pub mod module;
pub mod phoenix;
pub mod session;
pub mod supervisor;
pub mod token;

pub use backoff::BackoffPolicy;
pub use inbound::{InboundMessage, MessageData};
pub use link::{ChannelLink, ConnectRequest, Connector, RemoteActions, action_candidates};
pub use module::Mirkoczat;
pub use phoenix::PhoenixConnector;
pub use session::{AttachOutcome, ChannelSession, SessionPhase, SessionState};
pub use supervisor::{ConnectionSupervisor, SupervisorSettings, WeakSupervisor};
pub use token::Credentials;
