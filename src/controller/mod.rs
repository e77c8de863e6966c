mod controller;
pub use controller::Controller;

mod parse_nodes;
mod parse_services;
mod parse_endpoints;

mod reconciler;
pub use reconciler::Reconciler;
