pub mod cat;
pub mod check;
pub mod ls;
pub mod mount;

pub use cat::Cat;
pub use check::Check;
pub use ls::Ls;
pub use mount::Mount;
