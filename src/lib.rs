// Library for tests to access modules

pub mod blocklist;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod counter_store;
pub mod error;
pub mod interface_repo;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod scheduler;
pub mod sink;
pub mod speedtest;
pub mod version;
