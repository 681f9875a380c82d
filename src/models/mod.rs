pub mod interaction;
pub mod outbound;
