pub mod chain;
pub mod filter;
pub mod market_state;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod timer;
