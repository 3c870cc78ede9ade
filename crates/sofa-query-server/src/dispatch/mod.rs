//! Command dispatch for host messages.
//!
//! Every message is a JSON array whose first element names the command and
//! whose remaining elements are its arguments:
//!
//! ```json
//! ["add_fun", "emit_id"]
//! ["map_doc", {"_id": "foo"}]
//! ["ddoc", "_design/app", ["shows", "detail"], [{"_id": "foo"}, {}]]
//! ```
//!
//! The set of commands depends on the protocol revision the host announced
//! at startup and is fixed once the table is built.

mod ddoc;
mod request;
mod router;

pub use self::request::QueryRequest;
pub use self::router::{CommandTable, DISPATCH_TARGET, Handler};
