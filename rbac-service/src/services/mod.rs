//! Services layer for rbac-service.
//!
//! Holds the authorization core (role cache, role management, permission
//! calculation, approval workflow) and the storage implementations it runs on.

pub mod approval;
pub mod catalog;
pub mod clock;
mod database;
pub mod error;
mod memory;
pub mod metrics;
pub mod permission_calculator;
pub mod role_cache;
pub mod role_service;
pub mod store;

pub use approval::{ApprovalService, OpenedRequest};
pub use catalog::ActionCatalog;
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgStore;
pub use error::AuthzError;
pub use memory::{MemoryServiceTree, MemoryStore};
pub use permission_calculator::{PermissionCalculator, PermissionMap, PermissionQuery};
pub use role_cache::{RoleCache, RoleSnapshot};
pub use role_service::RoleService;
pub use store::{AuthzStore, NodeAdminLookup, StorageDeadline};
