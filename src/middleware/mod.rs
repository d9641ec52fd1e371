pub mod actor;
pub mod request_logger;

pub use actor::Actor;
pub use request_logger::request_logger_middleware;
