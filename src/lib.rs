pub mod board;
pub mod config;
pub mod grid;
pub mod intents;
pub mod journal;
pub mod labels;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod reconcile;
pub mod store;
