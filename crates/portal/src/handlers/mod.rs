//! API handlers module

pub mod auth;
pub mod directory;
pub mod health;
pub mod pages;
pub mod session;
pub mod settings;
