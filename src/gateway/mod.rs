//! Gateway: aggregate namespace, mount registry and HTTP surface
//!
//! ```text
//! POST /mcp ──▶ GatewayRouter::handle ──▶ tables ──▶ Arc<dyn Provider>
//!                     ▲   (ToolFilter on tools/list)
//!                     │ register / unregister / set_catalog
//!               MountRegistry ◀── admin routes, bootstrap
//! ```

pub mod admin;
pub mod cache;
pub mod discovery;
pub mod filter;
pub mod namespace;
pub mod registry;
mod router;
mod server;
pub mod session;
pub mod tables;

pub use discovery::{DiscoveredTool, ToolDiscovery};
pub use filter::ToolFilter;
pub use namespace::GatewayRouter;
pub use registry::{MountRegistry, MountState, MountStatus};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub use session::SessionStore;
