pub mod affiliate_payouts;
pub mod commissions;
pub mod users;
pub mod webhook_events;

pub use affiliate_payouts as payout_entity;
pub use affiliate_payouts::PayoutStatus;
pub use commissions as commission_entity;
pub use commissions::CommissionStatus;
pub use users as user_entity;
pub use users::PlanTier;
pub use webhook_events as webhook_event_entity;
