pub mod browser_provider;
pub mod command_provider;
pub mod filesystem_provider;
