pub mod app;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod output;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod transform;
