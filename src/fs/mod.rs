pub mod broadcast;
pub mod dir;
pub mod entry;
pub mod plumber;
pub mod readfn;
pub mod tree;

pub use broadcast::Broadcast;
pub use dir::Dir;
pub use entry::{Entry, Handle, Metadata};
pub use plumber::Plumber;
pub use readfn::ReadFn;
pub use tree::Tree;
