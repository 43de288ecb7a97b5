pub mod connection;
pub mod dispatcher;
pub mod pipeline;
pub mod session;
