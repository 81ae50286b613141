pub mod api;
pub mod app;
pub mod error;
pub mod mailer;
pub mod store;
pub mod util;
