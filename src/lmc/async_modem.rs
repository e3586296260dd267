//! Single-threaded cooperative async façade over `Modem`. Installs an IRQ
//! wake so `send`/`recv` futures suspend instead of spinning; cancellation
//! (dropping a future before it resolves) releases the radio by calling
//! `standby()`, matching the synchronous façade's "the radio is a shared,
//! half-duplex resource" invariant.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use embassy_sync::waitqueue::AtomicWaker;

use super::{
    antenna::AntennaSwitch,
    clock::MonotonicClock,
    driver::RadioChipDriver,
    error::ModemError,
    modem::{Modem, PollRecv, PollSend},
    rxpacket::RxPacket,
};

/// Wraps a `Modem`, enforcing "at most one pending send and one pending
/// recv" and waking registered task wakers from `on_irq`.
pub struct AsyncModem<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> {
    modem: Modem<D, A, C>,
    waker: AtomicWaker,
    send_pending: bool,
    recv_pending: bool,
}

impl<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> AsyncModem<D, A, C> {
    pub fn new(modem: Modem<D, A, C>) -> Self {
        Self {
            modem,
            waker: AtomicWaker::new(),
            send_pending: false,
            recv_pending: false,
        }
    }

    pub fn into_inner(self) -> Modem<D, A, C> {
        self.modem
    }

    /// Call from the radio's DIO interrupt line. Allocation-free, like
    /// `Modem::on_irq`, plus an `AtomicWaker::wake`, which is also
    /// allocation-free.
    pub fn on_irq(&self) {
        self.modem.on_irq();
        self.waker.wake();
    }

    /// Starts a transmission. Fails with `Busy` if a send is already
    /// pending; the returned future resolves to the completion timestamp.
    pub fn send<'m>(&'m mut self, payload: &[u8]) -> Result<SendFuture<'m, D, A, C>, ModemError> {
        if self.send_pending {
            return Err(ModemError::Busy);
        }
        self.modem.prepare_send(payload)?;
        self.modem.start_send()?;
        self.send_pending = true;
        Ok(SendFuture {
            modem: self,
            done: false,
        })
    }

    /// Arms a receive. Fails with `Busy` if a receive is already pending;
    /// the returned future resolves to `Some(packet)` or `None` on timeout.
    pub fn recv<'m>(
        &'m mut self,
        timeout_ms: Option<u32>,
        rx_length: u8,
    ) -> Result<RecvFuture<'m, D, A, C>, ModemError> {
        if self.recv_pending {
            return Err(ModemError::Busy);
        }
        self.modem.start_recv(timeout_ms, false, rx_length)?;
        self.recv_pending = true;
        Ok(RecvFuture {
            modem: self,
            done: false,
        })
    }
}

pub struct SendFuture<'m, D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> {
    modem: &'m mut AsyncModem<D, A, C>,
    done: bool,
}

impl<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> Future for SendFuture<'_, D, A, C> {
    type Output = Result<u32, ModemError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.modem.waker.register(cx.waker());
        match this.modem.modem.poll_send() {
            Ok(PollSend::Completed(ticks)) => {
                this.done = true;
                this.modem.send_pending = false;
                Poll::Ready(Ok(ticks))
            }
            Ok(PollSend::Idle) => {
                // Shouldn't happen while send_pending is true, but don't wedge.
                this.done = true;
                this.modem.send_pending = false;
                Poll::Ready(Err(ModemError::Busy))
            }
            Ok(PollSend::Busy) => Poll::Pending,
            Err(e) => {
                this.done = true;
                this.modem.send_pending = false;
                Poll::Ready(Err(e))
            }
        }
    }
}

impl<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> Drop for SendFuture<'_, D, A, C> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.modem.modem.standby();
            self.modem.send_pending = false;
        }
    }
}

pub struct RecvFuture<'m, D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> {
    modem: &'m mut AsyncModem<D, A, C>,
    done: bool,
}

impl<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> Future for RecvFuture<'_, D, A, C> {
    type Output = Result<Option<RxPacket>, ModemError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.modem.waker.register(cx.waker());
        match this.modem.modem.poll_recv(None) {
            Ok(PollRecv::Packet(p)) => {
                this.done = true;
                this.modem.recv_pending = false;
                Poll::Ready(Ok(Some(p)))
            }
            Ok(PollRecv::None) => {
                this.done = true;
                this.modem.recv_pending = false;
                Poll::Ready(Ok(None))
            }
            Ok(PollRecv::Busy) => Poll::Pending,
            Err(e) => {
                this.done = true;
                this.modem.recv_pending = false;
                Poll::Ready(Err(e))
            }
        }
    }
}

impl<D: RadioChipDriver, A: AntennaSwitch, C: MonotonicClock> Drop for RecvFuture<'_, D, A, C> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.modem.modem.standby();
            self.modem.recv_pending = false;
        }
    }
}
