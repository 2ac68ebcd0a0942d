pub mod auth;
pub mod bot;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod jobs;
pub mod keys;
pub mod middleware;
pub mod mirror;
pub mod models;
pub mod notify;
pub mod payments;
pub mod stores;
pub mod util;
