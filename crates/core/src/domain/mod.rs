pub mod booking;
pub mod intent;
pub mod session;
