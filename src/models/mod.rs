pub mod issuer;
pub mod issuing_request;
pub mod messages;
