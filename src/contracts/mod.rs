pub mod access_payment;

pub use access_payment::*;
