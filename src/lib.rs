// Library exports for CivicPulse
// This allows integration tests and external code to use CivicPulse modules

pub mod auth;
pub mod config;
pub mod contact;
pub mod db;
pub mod error;
pub mod extractors;
pub mod geocode;
pub mod issues;
pub mod routes;
pub mod state;
pub mod uploads;
