pub mod billing_event;
pub mod commission;
pub mod common;
pub mod payout;
pub mod user;

pub use billing_event::*;
pub use commission::*;
pub use common::*;
pub use payout::*;
pub use user::*;
