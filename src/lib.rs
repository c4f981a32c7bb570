//! Object lifetime and extension core for an embeddable scripting runtime
//!
//! Reference-counted handles over a cycle-collecting heap, a message-based
//! protocol for native extension types, and the built-in containers (string,
//! array, associative list with iterators, byte-trie table) implemented on
//! top of both.
//!
//! # Example
//!
//! ```
//! use cellvm::{Handle, Runtime};
//!
//! let mut rt = Runtime::new();
//! let list = rt.new_list().unwrap();
//! let key = rt.new_string("answer").unwrap();
//! rt.call_method(&list, "add", vec![key.clone(), Handle::Int(42)]).unwrap();
//! let value = rt.call_method(&list, "get", vec![key]).unwrap();
//! assert_eq!(value.to_int(), 42);
//! ```

pub mod config;
pub mod error;
pub mod gc;
pub mod json;
pub mod memory;
pub mod native;
pub mod prelude;
pub mod runtime;
pub mod value;

#[cfg(feature = "c-api")]
pub mod ffi;

pub use config::RuntimeConfig;
pub use error::{RuntimeError, Status};
pub use gc::{GcReport, GcStats, Marker};
pub use memory::{Allocator, CountingAllocator, MemoryRef, MemoryStats};
pub use native::{CallContext, Message, MessageCode, NativeObject, NativeType, Reply, TypeInfo};
pub use runtime::builtins::array::Array;
pub use runtime::builtins::delegate::Delegate;
pub use runtime::builtins::list::{List, ListIterator, SortOrder};
pub use runtime::builtins::string::ScriptString;
pub use runtime::builtins::table::{Table, TableMode};
pub use runtime::copy::DeepCopy;
pub use runtime::{Executor, GcParticipant, ParticipantId, Runtime};
pub use value::{CheapClone, ClassId, Handle, HostObject, WeakHandle};
