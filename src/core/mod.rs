pub mod avatar;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod keyring;
pub mod session;
