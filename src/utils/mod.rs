pub mod jwt;
pub mod money;
pub mod pagination;

pub use jwt::*;
pub use money::*;
pub use pagination::*;
