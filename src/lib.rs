pub mod config;
pub mod controller;
pub mod db;
pub mod environment;
pub mod errors;
pub mod events;
pub mod feed;
pub mod geo;
pub mod location;
pub mod log;
pub mod notify;
pub mod permissions;
pub mod reporter;
pub mod sync;
pub mod trip;
