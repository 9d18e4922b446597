//! Synchronization primitives the rest of the collector is built from:
//! pointer-sized atomics, an address-keyed parking lot, and the mutex/event/
//! once/recursive-mutex family layered on top of it. See spec §4.A-§4.B.

pub mod atomics;
pub mod event;
pub mod mutex;
pub mod once;
pub mod parking_lot;
pub mod raw_mutex;
pub mod recursive_mutex;

pub use event::{Event, RawEvent};
pub use mutex::Mutex;
pub use once::OnceFlag;
pub use raw_mutex::RawMutex;
pub use recursive_mutex::RecursiveMutex;
