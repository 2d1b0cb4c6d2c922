pub mod action;
pub mod assignment;
pub mod permission_request;
pub mod role;
pub mod service_tree;

pub use action::{Action, ActionCode, ActionType, ResourceType};
pub use assignment::{AssignRoleRequest, RoleAssignment, RoleGrant, Subject, SubjectType};
pub use permission_request::{
    CreatePermissionRequest, PermissionRequest, RequestFilter, RequestStatus, RequestTransition,
};
pub use role::{
    CreateRoleRequest, PermissionGrant, Role, RolePermission, RolePermissionSet,
    RoleWithPermissions, UpdateRoleRequest,
};
pub use service_tree::{NodeKind, ServiceTreeNode, TemplateType};
