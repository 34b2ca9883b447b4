pub mod error;
pub use error::OxivecError;
pub mod lock_utils;
