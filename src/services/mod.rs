pub mod billing_service;
pub mod commission_service;
pub mod eligibility_service;
pub mod payout_service;
pub mod user_service;

pub use billing_service::*;
pub use commission_service::*;
pub use eligibility_service::*;
pub use payout_service::*;
pub use user_service::*;
