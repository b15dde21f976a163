//! ViewSync Audit - Change log and event reporting
//!
//! Provides:
//! - `ChangeLogWriter`: appends every change event to a daily log file
//! - `TracingListener`: reports change events through `tracing`, honouring
//!   the notification policy
//!
//! Both implement `IChangeListener` and read their settings from the
//! current configuration snapshot on every event.

pub mod change_log;
pub mod reporter;

pub use change_log::ChangeLogWriter;
pub use reporter::TracingListener;
