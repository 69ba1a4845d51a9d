//! Destination channel implementations of [`EventSink`](crate::sink::EventSink).

mod console;
mod slack;

pub use console::ConsoleSink;
pub use slack::SlackSink;
