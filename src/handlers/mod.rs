pub mod admin;
pub mod affiliate;
pub mod webhook;

pub use admin::admin_config;
pub use affiliate::affiliate_config;
pub use webhook::webhook_config;
