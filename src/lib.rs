// GPT Limit Tester - Library root for testing

pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod http_client;
pub mod middleware;
pub mod mock_server;
pub mod models;
pub mod routes;
pub mod runner;
pub mod store;
