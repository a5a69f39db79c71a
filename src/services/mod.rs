pub mod device_service;
pub mod notify;
pub mod org_service;
pub mod policy;

pub use device_service::DeviceService;
pub use notify::{LoggedNotifier, NotificationDispatcher};
pub use org_service::OrgService;
pub use policy::{AccessPolicyService, LoggedPolicyService};
