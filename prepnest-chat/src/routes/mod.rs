pub mod conversations;
pub mod groups;
pub mod health;
pub mod messages;
