//! Data objects flowing through the pipeline.
//!
//! - [`object`]: the `DataObject` contract and retain/release bookkeeping
//! - [`access`]: scoped access guards and the per-representation in-use token
//! - [`buffer`]: multi-device array kind
//! - [`value`]: host-only scalar kind

pub mod access;
pub mod buffer;
pub mod object;
pub mod value;

pub use access::{AccessGuard, AccessMode, AccessState};
pub use buffer::{Buffer, BufferView, ImageView};
pub use object::{downcast_data, downcast_data_ref, AsAny, DataCore, DataObject, DataRef};
pub use value::{Value, ValueHandle};
