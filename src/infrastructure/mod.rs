pub mod config;
pub mod credential_store;
pub mod error;
pub mod local_store;
pub mod session_dto;
pub mod sessions_api_client;
pub mod storage;
