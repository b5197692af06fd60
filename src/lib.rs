pub mod auth;
pub mod cache;
pub mod channels;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;

#[cfg(test)]
pub mod testing;
