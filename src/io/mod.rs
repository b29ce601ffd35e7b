//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: Pure I/O layer for bidirectional message exchange
//! - **Process**: External process lifecycle management with stderr forwarding
//! - **Output**: Write sinks for server output and lifecycle messages
//!
//! None of these know anything about R or scoping.

pub mod output;
pub mod process;
pub mod transport;

pub use output::{MemoryOutputSink, OutputSink, TracingOutputSink};
pub use process::{
    ChildProcessManager, ProcessError, ProcessExitEvent, ProcessExitHandler, ProcessManager,
    ProcessState, StderrMonitor, StdioMode, StopMode,
};
pub use transport::{StreamTransport, Transport, TransportError};
