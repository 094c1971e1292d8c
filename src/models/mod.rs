pub mod credential;
pub mod payment;

pub use credential::*;
pub use payment::*;
