mod contact;
pub mod input;
mod message;

pub use contact::Contact;
pub use message::StoredMessage;
