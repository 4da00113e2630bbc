pub mod admin;
pub mod auth;
pub mod balance;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod session_management;
pub mod statistics;
pub mod storage;
pub mod web_interface;
