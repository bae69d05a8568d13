pub mod ecdsa_engine;
pub mod signing_engine;
