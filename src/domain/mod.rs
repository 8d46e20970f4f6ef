pub mod device;
pub mod messages;
pub mod settings;
