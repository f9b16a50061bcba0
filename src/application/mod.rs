pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod logging;
pub mod sessions_service;
pub mod timer_runner;
