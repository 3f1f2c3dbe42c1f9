pub mod api;
pub mod app;
pub mod error;
pub mod model;
pub mod service;
pub mod store;
