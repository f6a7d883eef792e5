//! NCO portal - job description classification backend
//!
//! This library provides the core functionality of the portal: accounts,
//! occupation search against the National Classification of Occupations,
//! datasets, analytics and auditing, exposed over a JSON HTTP API.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
