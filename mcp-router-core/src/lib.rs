//! Capability-federation engine for the MCP router: the child supervisor,
//! the unified capability registry, and the dispatch layer that forwards
//! unified-name calls to the owning child.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod supervisor;

pub use config::RouterConfig;
pub use config::ServerConfig;
pub use error::RouterError;
pub use registry::Registry;
pub use supervisor::ChildState;
pub use supervisor::Supervisor;
