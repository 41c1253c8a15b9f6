//! REITTI - Kubernetes ingress-to-proxy-config controller
//!
//! Watches Ingress, Endpoints and Secret resources and projects them into an
//! in-memory routing table served to a reverse proxy over HTTP.

pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod reconcile;
pub mod render;
pub mod serve;
pub mod state;
