//! Offline agent
//!
//! Background worker that answers every request made by the app: same-origin
//! GETs come from a versioned cache (falling back to the app shell for page
//! navigations), cross-origin traffic is refused outright.

pub mod agent;
pub mod cache;
pub mod http;
pub mod manifest;
pub mod network;
pub mod worker;

pub use agent::{AgentState, InstallReport, OfflineAgent};
pub use cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use http::{AgentResponse, CachedResponse, FetchOutcome, FetchRequest, RequestMode, ResponseSource};
pub use manifest::AgentManifest;
pub use network::{HttpNetwork, Network, StaticDirNetwork};
pub use worker::{spawn_agent, AgentHandle};
