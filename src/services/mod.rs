// Catalog pricing and admin catalog writes
pub mod catalog;

// Profile contact sync and the administrator gate
pub mod profiles;

// Order assembly (cash on delivery) and order administration
pub mod orders;

// bKash gateway adapter
pub mod payments;
