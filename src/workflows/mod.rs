pub mod auth;
pub mod code;
pub mod payment;
pub mod subscription;
