//! ### What is fabric-tcp?
//! fabric-tcp is a TCP transport adapter: it bridges real TCP socket endpoints to a
//! framed message fabric used by an event-driven dataplane. For each accepted or
//! initiated connection it creates a pair of unidirectional logical streams -- one
//! carrying bytes read from the socket toward a downstream consumer, and one carrying
//! bytes written to the socket from a downstream producer -- under a credit-based
//! backpressure protocol.
//!
//! ### How does data flow?
//! ```text
//!                 routes                  streams
//!   +----------+  accept  +---------+  BEGIN/DATA/END  +------------+
//!   | Acceptor | -------> | Factory | ---------------> | downstream |
//!   +----------+          +---------+                  |  consumer  |
//!        |                  |     |    WINDOW/RESET    +------------+
//!        v                  v     | <------------------
//!   +----------+      +--------+  |
//!   |  Poller  | <--- | Read / |  |   DATA/END/ABORT   +------------+
//!   | (mio)    | ---> | Write  | <------------------   | downstream |
//!   +----------+      | Stream |  ------------------>  |  producer  |
//!                     +--------+    WINDOW/RESET       +------------+
//! ```
//!
//! A [ReadStream](crate::stream::ReadStream) drains socket bytes into DATA frames,
//! never exceeding the credit window granted by WINDOW frames on its throttle. A
//! [WriteStream](crate::stream::WriteStream) consumes DATA frames, spin-retries
//! transient zero-length writes, parks unwritten suffixes in a shared
//! [slot pool](crate::buffer::SlotPool), and credits the producer back once bytes
//! reach the socket. All of it runs on one cooperative reactor thread driven by
//! [poll_once](crate::poller::Poller::poll_once).
//!
//! The [TcpAdapter](crate::adapter::TcpAdapter) facade owns the reactor and exposes
//! the control surface: route registration for the accept and connect sides, named
//! downstream sinks, and the `handle_stream` / `handle_throttle` entry points the
//! fabric calls into.
#![warn(rust_2018_idioms)]
#![allow(dead_code)]
#![warn(missing_docs)]

pub mod acceptor;
pub mod adapter;
pub mod buffer;
pub mod config;
pub mod connector;
pub mod counters;
pub mod error;
pub mod frame;
pub mod poller;
pub mod route;
pub mod stream;
