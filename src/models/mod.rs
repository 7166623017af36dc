pub mod consultation;
pub mod token;
pub mod user;
