// src/lib.rs — Library root for the DealGenie assistant session engine

pub mod conversation;
pub mod infra;
pub mod quota;
pub mod session;
pub mod transport;
