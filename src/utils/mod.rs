pub mod crypto;
pub mod serialization;
pub mod token;
