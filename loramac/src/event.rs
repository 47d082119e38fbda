//! The central event queue: the only way radio interrupts and timer
//! callbacks reach the MAC.

use heapless::mpmc::MpMcQueue;

use crate::timer::TimerId;

/// Everything the MAC engine reacts to. Radio events are posted by the
/// driver's interrupt handlers; timer events by the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Event {
    RadioTxDone,
    /// A frame was received; the payload is read back from the radio via
    /// [`PhyRxTx::received_packet`](crate::radio::PhyRxTx::received_packet).
    RadioRxDone { len: u16, rssi: i16, snr: i8 },
    RadioRxTimeout,
    RadioRxError,
    RadioTxTimeout,
    Timer(TimerId),
}

/// Lock-free multi-producer queue with a single consumer: the MAC event
/// context.
///
/// `post` takes `&self` and never blocks, so it is safe to call from
/// interrupt context; ISR shims hold a shared reference to the queue they
/// were wired to at initialization.
pub struct EventQueue<const E: usize = 16> {
    queue: MpMcQueue<Event, E>,
}

impl<const E: usize> EventQueue<E> {
    pub const fn new() -> Self {
        Self { queue: MpMcQueue::new() }
    }

    /// Enqueues an event; the event is handed back when the queue is full
    /// so the caller can count the overrun.
    pub fn post(&self, event: Event) -> Result<(), Event> {
        self.queue.enqueue(event)
    }

    /// Takes the next event off the queue. Only the MAC consumer context
    /// may call this.
    pub fn pop(&self) -> Option<Event> {
        self.queue.dequeue()
    }
}

impl<const E: usize> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_out_in_post_order() {
        let queue: EventQueue<4> = EventQueue::new();
        queue.post(Event::RadioTxDone).unwrap();
        queue.post(Event::Timer(TimerId::RxWindow1)).unwrap();
        assert_eq!(queue.pop(), Some(Event::RadioTxDone));
        assert_eq!(queue.pop(), Some(Event::Timer(TimerId::RxWindow1)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_hands_the_event_back() {
        let queue: EventQueue<2> = EventQueue::new();
        queue.post(Event::RadioTxDone).unwrap();
        queue.post(Event::RadioRxError).unwrap();
        assert_eq!(queue.post(Event::RadioRxTimeout), Err(Event::RadioRxTimeout));
    }
}
