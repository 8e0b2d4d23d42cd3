pub mod builder;
pub mod identity;
pub mod registry;
