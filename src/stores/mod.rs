mod dir;
mod dns;
mod memory;

pub use dir::*;
pub use dns::*;
pub use memory::*;
pub use test::*;
