pub mod bus;
pub mod handlers;
pub mod markets;
pub mod store;
