//! Caller-supplied callbacks for pushed values.
//!
//! The query channel pushes `str` bodies for keys the caller listens on, the
//! video channel pushes every decoded [`Frame`](crate::Frame). Both are
//! delivered synchronously on the channel's reader thread, so a slow listener
//! delays every later message on that channel.

use std::sync::Arc;

/// Receives values pushed by a channel.
///
/// `on_error` is called once when the channel's reader stops without being
/// asked to (connection closed or failed). The default does nothing.
pub trait EventListener<T: ?Sized>: Send + Sync {
    fn on_value(&self, value: &T);

    fn on_error(&self) {}
}

impl<T, F> EventListener<T> for F
where
    T: ?Sized,
    F: Fn(&T) + Send + Sync,
{
    fn on_value(&self, value: &T) {
        self(value)
    }
}

/// Shared handle the channels keep for a registered listener.
pub type SharedListener<T> = Arc<dyn EventListener<T>>;
