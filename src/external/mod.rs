pub mod stripe;
pub mod transfer;

pub use self::stripe::*;
pub use transfer::*;
