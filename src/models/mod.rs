pub mod checkout;
pub mod credits;
pub mod subscription;
