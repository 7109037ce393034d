mod database {
    pub mod actions;
    pub mod error;
    pub mod pagination;
    pub mod schema;
}
mod authentication {
    pub mod jwt;
    pub mod middleware;
}
mod constants;
mod media;

pub use authentication::*;
pub use constants::*;
pub use database::*;
pub use media::*;
