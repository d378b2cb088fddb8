pub mod chat;
pub mod user;

pub use chat::{ChatMessage, ChatPayload, MessageType};
pub use user::{LoginRequest, RegisterRequest, User, UserCredential, UserRole};
