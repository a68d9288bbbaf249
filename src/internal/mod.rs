#[macro_use]
pub mod macros;

pub mod inflater;
pub mod prelude;
pub mod tokio;
