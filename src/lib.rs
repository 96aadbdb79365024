pub mod config;
pub mod metadata;
pub mod repository;
pub mod search;
