// Core modules
pub mod clock;
pub mod config;
pub mod encryption;
pub mod errors;
pub mod plans;

// Embedded client-side validator (offline-validation contract)
pub mod client {
    pub mod cache;
    pub mod http;
    pub mod validator;
}

// Server-side components
#[cfg(feature = "server")]
pub mod server {
    pub mod admin;
    pub mod api_error;
    pub mod audit;
    pub mod auth;
    pub mod events;
    pub mod gateway;
    pub mod handlers;
    pub mod logging;
    pub mod revocation;
    pub mod routes;
    pub mod service;
    pub mod store;
    pub mod tokens;
    pub mod validation;
    pub mod validator;

    #[cfg(feature = "rate-limiting")]
    pub mod rate_limit;

    pub use api_error::{ApiError, ErrorCode};
    pub use events::{BusMessage, EventBus, Topic};
    pub use handlers::AppState;
    pub use routes::build_router;
    pub use service::LicenseService;
    pub use store::{Database, License};
    pub use tokens::TokenCodec;
    pub use validator::Outcome;
}

// Background sweeps (expiry, warnings, garbage collection, monthly report)
#[cfg(feature = "background-jobs")]
pub mod jobs;
