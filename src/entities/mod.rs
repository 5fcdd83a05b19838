pub mod booklet;
pub mod order;
pub mod paper;
pub mod purchase;
pub mod user_profile;

pub use purchase::{PaymentMethod, PaymentStatus};
