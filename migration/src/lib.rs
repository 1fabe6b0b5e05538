pub use sea_orm_migration::prelude::*;

mod m20250901_000001_create_users;
mod m20250901_000002_create_affiliate_payouts;
mod m20250901_000003_create_commissions;
mod m20250901_000004_create_webhook_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_create_users::Migration),
            Box::new(m20250901_000002_create_affiliate_payouts::Migration),
            Box::new(m20250901_000003_create_commissions::Migration),
            Box::new(m20250901_000004_create_webhook_events::Migration),
        ]
    }
}
