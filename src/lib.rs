//! An InfiniBand general management agent: issues management datagrams,
//! retransmits them until answered, and answers the ones it receives.

mod agent;
mod config;
mod device;
mod error;
mod handler;
pub mod mad;
mod request;
mod retry;
pub mod transport;
pub mod type_alias;

#[cfg(test)]
mod tests;

pub use self::agent::{Agent, AgentBuilder, TidAllocator, TID_MAGIC};
pub use self::config::AgentConfig;
pub use self::device::IbDevice;
pub use self::error::{CompletionError, Error, Result};
pub use self::handler::{DispatchKey, DispatchTable, Dispatched, HandlerResult, MadHandler};
pub use self::mad::Mad;
pub use self::retry::{RetryTimer, DEFAULT_MAX_TIMEOUT, DEFAULT_MIN_TIMEOUT, TIMEOUT_CEILING};
