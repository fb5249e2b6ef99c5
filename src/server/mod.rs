mod handlers;
mod models;
mod page;
mod requests;
mod state;

pub use handlers::run_server;
