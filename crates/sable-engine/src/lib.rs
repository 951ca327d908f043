//! Search and NNUE evaluation for sable.

pub mod nnue;
pub mod position;
pub mod search;
pub mod time;

pub use nnue::{Network, NetworkError};
pub use position::Positions;
pub use search::control::{SearchLimits, TimeManager};
pub use search::pool::SearchHandler;
pub use search::SearchResult;

/// Hard ceiling on search depth, in plies from the search root.
pub const MAX_PLY: usize = 128;

/// Allocate a zeroed `Box<T>` without constructing `T` on the stack.
///
/// The history tables and the network are tens of megabytes; building them
/// as stack temporaries before boxing would overflow the thread stack.
pub(crate) fn alloc_zeroed_box<T>() -> Box<T> {
    use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};

    let layout = Layout::new::<T>();
    let ptr = unsafe { alloc_zeroed(layout) as *mut T };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }
    unsafe { Box::from_raw(ptr) }
}
