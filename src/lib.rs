pub mod airtable;
pub mod config;
pub mod payload;
pub mod relay;
pub mod server;
pub mod wavespeed;
