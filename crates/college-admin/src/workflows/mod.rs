pub mod academy;
pub mod lifecycle;
