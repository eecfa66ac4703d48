pub mod delete;
pub mod deploy;
pub mod validate;
