//! HTTP edge handlers (C15): one module per resource group, thin
//! translators between the axum extractors and the domain components.

pub mod admin;
pub mod download;
pub mod health;
pub mod info;
pub mod jobs;
