pub mod availability;
pub mod cart_locks;
pub mod fiscal;
pub mod orders;
pub mod reservations;
pub mod sweeper;
