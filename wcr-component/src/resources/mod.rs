//! Resource handles and ownership discipline.

mod handles;

pub use handles::{BorrowParent, BorrowedHandle, Handle, HandleRep, OwnedHandle};
