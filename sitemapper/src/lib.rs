pub mod commands;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod worker;

pub use gateway::{Gateway, Outcome, PublishTask};
pub use router::{ClientConnection, ClientRegistry, ConnectionId, ResultRouter};
pub use worker::Worker;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
