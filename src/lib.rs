pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod middleware;
pub mod services;
pub mod state;
pub mod validation;
