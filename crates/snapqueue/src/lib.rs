pub mod admin;
pub mod config;
pub mod db;
pub mod jobs;
