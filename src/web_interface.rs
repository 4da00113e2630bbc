// Web Interface module root
pub mod filters;
pub mod routes;
pub mod types;
pub mod web_server;

pub use web_server::{Services, WebServer};
