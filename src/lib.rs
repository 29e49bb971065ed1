pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod validate;
pub mod workflow;
