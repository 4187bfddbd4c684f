pub mod course;
pub mod profile;

pub use course::*;
pub use profile::*;
