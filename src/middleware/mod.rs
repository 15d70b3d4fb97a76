pub mod request_logger;

pub use request_logger::{request_logger_middleware, RequestLogging, REQUEST_ID_HEADER};
