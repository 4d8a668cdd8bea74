// ABOUTME: Command implementations behind the CLI surface
// ABOUTME: Exports the catchup and sentinel commands

pub mod catchup;
pub mod sentinel;

pub use catchup::catchup;
pub use sentinel::sentinel;
