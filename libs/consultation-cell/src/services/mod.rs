// libs/consultation-cell/src/services/mod.rs
pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod midtrans;
pub mod notify;
pub mod payment;
pub mod presence;
pub mod sweeper;
