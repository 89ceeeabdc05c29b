pub mod core;
pub mod loader;

pub use self::core::Compiler;
