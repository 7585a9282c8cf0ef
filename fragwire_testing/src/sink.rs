//! Reassembly sinks that keep what they receive.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use fragwire::{FragmentAck, ReassemblySink};

/// Sink storing delivered messages and acknowledgements.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Messages in delivery order.
    pub delivered: Vec<Bytes>,
    /// Acknowledgements in emission order.
    pub acks: Vec<FragmentAck>,
}

impl CollectingSink {
    /// Remove and return the queued acknowledgements.
    pub fn take_acks(&mut self) -> Vec<FragmentAck> { std::mem::take(&mut self.acks) }
}

impl ReassemblySink for CollectingSink {
    fn deliver(&mut self, message: Bytes) { self.delivered.push(message); }

    fn acknowledge(&mut self, ack: FragmentAck) { self.acks.push(ack); }
}

/// Clonable handle to a [`CollectingSink`], for sinks owned by a registry
/// but inspected by the test.
#[derive(Clone, Debug, Default)]
pub struct SharedSink(Rc<RefCell<CollectingSink>>);

impl SharedSink {
    /// Create an empty shared sink.
    pub fn new() -> Self { Self::default() }

    /// Number of delivered messages.
    pub fn delivered_count(&self) -> usize { self.0.borrow().delivered.len() }

    /// Copy of the delivered messages.
    pub fn delivered(&self) -> Vec<Bytes> { self.0.borrow().delivered.clone() }

    /// Remove and return the queued acknowledgements.
    pub fn take_acks(&self) -> Vec<FragmentAck> { self.0.borrow_mut().take_acks() }
}

impl ReassemblySink for SharedSink {
    fn deliver(&mut self, message: Bytes) { self.0.borrow_mut().deliver(message); }

    fn acknowledge(&mut self, ack: FragmentAck) { self.0.borrow_mut().acknowledge(ack); }
}
