//! Listener registry backing a socket's `message`, `error` and `close` events.

use std::net::IpAddr;

use crate::error::Error;

pub type MessageListener = Box<dyn FnMut(Vec<u8>, IpAddr)>;
pub type ErrorListener = Box<dyn FnMut(&Error)>;
pub type CloseListener = Box<dyn FnMut()>;

#[derive(Default)]
pub struct Listeners {
    message: Vec<MessageListener>,
    error: Vec<ErrorListener>,
    close: Vec<CloseListener>,
}

impl Listeners {
    pub fn new() -> Self {
        Listeners::default()
    }

    pub fn add_message(&mut self, listener: MessageListener) {
        self.message.push(listener);
    }

    pub fn add_error(&mut self, listener: ErrorListener) {
        self.error.push(listener);
    }

    pub fn add_close(&mut self, listener: CloseListener) {
        self.close.push(listener);
    }

    pub fn has_error_listener(&self) -> bool {
        !self.error.is_empty()
    }

    /// Every listener gets its own copy of `data`; the last one gets the
    /// original.
    pub fn emit_message(&mut self, data: Vec<u8>, source: IpAddr) {
        if let Some((last, rest)) = self.message.split_last_mut() {
            for listener in rest {
                listener(data.clone(), source);
            }
            last(data, source);
        }
    }

    pub fn emit_error(&mut self, error: &Error) {
        for listener in &mut self.error {
            listener(error);
        }
    }

    pub fn emit_close(&mut self) {
        for listener in &mut self.close {
            listener();
        }
    }
}
