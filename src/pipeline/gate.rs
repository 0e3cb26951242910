use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// One-shot barrier for a fixed number of parties.
///
/// Each party holds a [`GateTicket`]. Calling [`GateTicket::wait`] arrives at the gate
/// and blocks until every party has arrived. A ticket that is dropped without waiting
/// still counts as arrived, so a party that exits early (no more input, or an error)
/// never leaves the others waiting. Once open the gate stays open.
pub struct RendezvousGate {
    parties: usize,
    remaining: Mutex<usize>,
    opened: Condvar,
}

impl RendezvousGate {
    pub fn new(parties: usize) -> Self {
        RendezvousGate {
            parties,
            remaining: Mutex::new(parties),
            opened: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out one party's ticket. Callers must take exactly `parties` tickets.
    pub fn ticket(&self) -> GateTicket<'_> {
        GateTicket {
            gate: self,
            arrived: false,
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn remaining(&self) -> usize {
        *self.lock()
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    fn arrive(&self) -> MutexGuard<'_, usize> {
        let mut remaining = self.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.opened.notify_all();
        }
        remaining
    }

    fn arrive_and_wait(&self) {
        let mut remaining = self.arrive();
        while *remaining > 0 {
            remaining = self.opened.wait(remaining).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct GateTicket<'a> {
    gate: &'a RendezvousGate,
    arrived: bool,
}

impl GateTicket<'_> {
    /// Arrives and blocks until the gate opens. Later calls return immediately.
    pub fn wait(&mut self) {
        if !self.arrived {
            self.arrived = true;
            self.gate.arrive_and_wait();
        }
    }

    pub fn has_arrived(&self) -> bool {
        self.arrived
    }
}

impl Drop for GateTicket<'_> {
    fn drop(&mut self) {
        if !self.arrived {
            self.arrived = true;
            drop(self.gate.arrive());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn nobody_passes_before_everyone_arrives() {
        let gate = Arc::new(RendezvousGate::new(4));
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let arrived = Arc::clone(&arrived);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * i));
                    let mut ticket = gate.ticket();
                    arrived.fetch_add(1, Ordering::SeqCst);
                    ticket.wait();
                    arrived.load(Ordering::SeqCst)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
        assert!(gate.is_open());
    }

    #[test]
    fn dropped_ticket_releases_waiters() {
        let gate = Arc::new(RendezvousGate::new(2));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let mut ticket = gate.ticket();
                ticket.wait();
            })
        };
        thread::sleep(Duration::from_millis(10));
        assert_eq!(gate.remaining(), 1);
        drop(gate.ticket());
        waiter.join().unwrap();
        assert!(gate.is_open());
    }

    #[test]
    fn gate_stays_open_after_firing() {
        let gate = RendezvousGate::new(1);
        let mut ticket = gate.ticket();
        ticket.wait();
        assert!(ticket.has_arrived());
        ticket.wait();
        drop(ticket);
        assert_eq!(gate.remaining(), 0);
    }
}
