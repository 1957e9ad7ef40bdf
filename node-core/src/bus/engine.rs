use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::BUS_SLEEP_BLOCK;
use crate::scheduler::EventScheduler;
use crate::sleep::EnergyArbiter;
use crate::slot::Slot;

use super::{
    BusCommand, BusCondition, BusController, BusFault, BusRequest, Direction, MAX_TRANSFER_BYTES,
};

/// Progress of an in-flight transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer {
    pub request: BusRequest,
    /// Word being drained (write) or assembled (read).
    pub word: u32,
    /// Data bytes still to move.
    pub remaining: u8,
}

impl Transfer {
    const fn new(request: BusRequest) -> Self {
        let word = match request.direction {
            Direction::Write => request.word,
            Direction::Read => 0,
        };
        Self {
            request,
            word,
            remaining: request.byte_count,
        }
    }
}

/// Engine state; every non-idle variant carries the transfer it is serving.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// No transaction in flight.
    Idle,
    /// Device address (write) sent; the register address goes next.
    InitWrite(Transfer),
    /// Register address sent on a read; repeated START goes next.
    AddrForRead(Transfer),
    /// Read address sent; data bytes drive progress from here.
    InitRead(Transfer),
    /// Sending data bytes.
    WriteData(Transfer),
    /// STOP issued; waiting for it to complete.
    AwaitStop(Transfer),
}

/// Data-free view of [`BusState`] for logs and faults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusPhase {
    Idle,
    InitWrite,
    AddrForRead,
    InitRead,
    WriteData,
    AwaitStop,
}

impl BusState {
    pub const fn phase(&self) -> BusPhase {
        match self {
            BusState::Idle => BusPhase::Idle,
            BusState::InitWrite(_) => BusPhase::InitWrite,
            BusState::AddrForRead(_) => BusPhase::AddrForRead,
            BusState::InitRead(_) => BusPhase::InitRead,
            BusState::WriteData(_) => BusPhase::WriteData,
            BusState::AwaitStop(_) => BusPhase::AwaitStop,
        }
    }
}

struct Inner<C> {
    controller: C,
    state: BusState,
    last_read: u32,
}

/// Transaction engine bound to one bus controller.
pub struct BusEngine<'a, C> {
    inner: Mutex<RefCell<Inner<C>>>,
    slot: Slot,
    arbiter: &'a EnergyArbiter,
    scheduler: &'a EventScheduler,
}

impl<'a, C> BusEngine<'a, C>
where
    C: BusController,
{
    pub const fn new(
        controller: C,
        arbiter: &'a EnergyArbiter,
        scheduler: &'a EventScheduler,
    ) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                controller,
                state: BusState::Idle,
                last_read: 0,
            })),
            slot: Slot::new(),
            arbiter,
            scheduler,
        }
    }

    /// Recovers the bus from whatever a reset left behind and marks the engine
    /// available.
    ///
    /// A peripheral may be mid-transfer after a reset or brown-out; clocking a
    /// START/STOP pair with interrupts disabled forces every device back to
    /// idle.
    pub fn open(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let controller = &mut inner.controller;

            controller.command(BusCommand::ABORT);
            let saved_mask = controller.interrupt_mask();
            controller.set_interrupt_mask(0);
            controller.clear_flags();
            controller.command(BusCommand::CLEAR_TX);
            controller.command(BusCommand::START | BusCommand::STOP);
            while !controller.stop_detected() {
                core::hint::spin_loop();
            }
            controller.clear_flags();
            controller.command(BusCommand::ABORT);
            controller.set_interrupt_mask(saved_mask);

            inner.state = BusState::Idle;
        });
        self.slot.open();
    }

    /// Starts `request`, waiting for any transaction already in flight.
    ///
    /// Returns once the address byte is queued; completion is signalled by the
    /// request's event and by [`BusEngine::is_available`].
    pub fn start(&self, request: BusRequest) -> Result<(), BusFault> {
        if request.byte_count == 0 || request.byte_count > MAX_TRANSFER_BYTES {
            return Err(BusFault::InvalidLength(request.byte_count));
        }

        self.slot.acquire();
        let started = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.controller.is_idle() {
                return Err(BusFault::NotIdle);
            }
            self.arbiter.block(BUS_SLEEP_BLOCK)?;

            inner.state = BusState::InitWrite(Transfer::new(request));
            inner.controller.command(BusCommand::START);
            inner.controller.transmit(request.write_address());
            Ok(())
        });
        if started.is_err() {
            self.slot.release();
        }
        started
    }

    /// Services the controller interrupt.
    pub fn on_interrupt(&self) -> Result<(), BusFault> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let pending = inner.controller.take_pending();
            for condition in pending.iter() {
                self.step(&mut inner, condition)?;
            }
            Ok(())
        })
    }

    /// Applies a single condition, as if the controller had raised it.
    pub fn handle(&self, condition: BusCondition) -> Result<(), BusFault> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            self.step(&mut inner, condition)
        })
    }

    fn step(&self, inner: &mut Inner<C>, condition: BusCondition) -> Result<(), BusFault> {
        let controller = &mut inner.controller;
        let next = match (inner.state, condition) {
            (BusState::InitWrite(transfer), BusCondition::Ack) => {
                controller.transmit(transfer.request.register_address);
                match transfer.request.direction {
                    Direction::Write => BusState::WriteData(transfer),
                    Direction::Read => BusState::AddrForRead(transfer),
                }
            }
            (BusState::AddrForRead(transfer), BusCondition::Ack) => {
                controller.command(BusCommand::START);
                controller.transmit(transfer.request.read_address());
                BusState::InitRead(transfer)
            }
            (BusState::InitRead(transfer), BusCondition::Ack) => BusState::InitRead(transfer),
            (BusState::WriteData(mut transfer), BusCondition::Ack) => {
                transfer.remaining -= 1;
                controller.transmit(byte_at(transfer.word, transfer.remaining));
                if transfer.remaining == 0 {
                    controller.command(BusCommand::STOP);
                    BusState::AwaitStop(transfer)
                } else {
                    BusState::WriteData(transfer)
                }
            }
            (BusState::InitRead(mut transfer), BusCondition::DataReceived) => {
                transfer.remaining -= 1;
                let byte = controller.receive();
                transfer.word |= u32::from(byte) << (8 * u32::from(transfer.remaining));
                if transfer.remaining == 0 {
                    controller.command(BusCommand::NACK);
                    controller.command(BusCommand::STOP);
                    BusState::AwaitStop(transfer)
                } else {
                    controller.command(BusCommand::ACK);
                    BusState::InitRead(transfer)
                }
            }
            (BusState::AwaitStop(transfer), BusCondition::Stop) => {
                self.arbiter.unblock(BUS_SLEEP_BLOCK)?;
                if transfer.request.direction == Direction::Read {
                    inner.last_read = transfer.word;
                }
                self.slot.release();
                if let Some(event) = transfer.request.completion {
                    self.scheduler.post(event);
                }
                BusState::Idle
            }
            (state, condition) => {
                return Err(BusFault::ProtocolViolation {
                    phase: state.phase(),
                    condition,
                });
            }
        };
        inner.state = next;
        Ok(())
    }

    /// Returns `true` when no transaction is in flight.
    pub fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    /// Spins until the in-flight transaction (if any) completes.
    pub fn wait_until_available(&self) {
        while !self.is_available() {
            core::hint::spin_loop();
        }
    }

    /// Word assembled by the most recent completed read.
    pub fn last_read(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).last_read)
    }

    pub fn state(&self) -> BusState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state)
    }

    /// Runs `f` against the controller with interrupts masked.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).controller))
    }
}

/// Byte `index` of `word`, counting from the least significant.
const fn byte_at(word: u32, index: u8) -> u8 {
    (word >> (8 * index as u32)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConditions;
    use crate::scheduler::Event;
    use crate::sleep::EnergyMode;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Op {
        Command(u8),
        Transmit(u8),
    }

    #[derive(Default)]
    struct ScriptedController {
        ops: Vec<Op, 32>,
        rx: Vec<u8, 4>,
        mask: u32,
        busy: bool,
        pending: BusConditions,
    }

    impl BusController for ScriptedController {
        fn command(&mut self, command: BusCommand) {
            self.ops.push(Op::Command(command.bits())).unwrap();
        }

        fn transmit(&mut self, byte: u8) {
            self.ops.push(Op::Transmit(byte)).unwrap();
        }

        fn receive(&mut self) -> u8 {
            self.rx.remove(0)
        }

        fn is_idle(&self) -> bool {
            !self.busy
        }

        fn interrupt_mask(&self) -> u32 {
            self.mask
        }

        fn set_interrupt_mask(&mut self, mask: u32) {
            self.mask = mask;
        }

        fn clear_flags(&mut self) {
            self.pending = BusConditions::NONE;
        }

        fn stop_detected(&self) -> bool {
            true
        }

        fn take_pending(&mut self) -> BusConditions {
            core::mem::take(&mut self.pending)
        }
    }

    fn opened<'a>(
        arbiter: &'a EnergyArbiter,
        scheduler: &'a EventScheduler,
    ) -> BusEngine<'a, ScriptedController> {
        let engine = BusEngine::new(
            ScriptedController {
                mask: 0x160,
                ..ScriptedController::default()
            },
            arbiter,
            scheduler,
        );
        engine.open();
        engine.with_controller(|c| c.ops.clear());
        engine
    }

    #[test]
    fn open_runs_recovery_and_restores_interrupt_mask() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = BusEngine::new(
            ScriptedController {
                mask: 0x160,
                ..ScriptedController::default()
            },
            &arbiter,
            &scheduler,
        );
        assert!(!engine.is_available());

        engine.open();

        engine.with_controller(|c| {
            assert_eq!(
                c.ops.as_slice(),
                &[
                    Op::Command(0x20),
                    Op::Command(0x40),
                    Op::Command(0x03),
                    Op::Command(0x20),
                ]
            );
            assert_eq!(c.mask, 0x160);
        });
        assert!(engine.is_available());
    }

    #[test]
    fn start_addresses_device_for_write_and_blocks_bus_depth() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);

        engine
            .start(BusRequest::read(0x55, 0x13, 2))
            .expect("start should succeed");

        assert_eq!(engine.state().phase(), BusPhase::InitWrite);
        assert!(!engine.is_available());
        assert_eq!(arbiter.votes(EnergyMode::Em2), 1);
        engine.with_controller(|c| {
            assert_eq!(c.ops.as_slice(), &[Op::Command(0x01), Op::Transmit(0xAA)]);
        });
    }

    #[test]
    fn read_assembles_big_endian_word() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);
        engine.with_controller(|c| c.rx.extend_from_slice(&[0x12, 0x34]).unwrap());

        engine
            .start(BusRequest::read(0x55, 0x13, 2).with_completion(Some(Event::SensorReadComplete)))
            .unwrap();
        engine.handle(BusCondition::Ack).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::AddrForRead);
        engine.handle(BusCondition::Ack).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::InitRead);
        engine.handle(BusCondition::Ack).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::InitRead);
        engine.handle(BusCondition::DataReceived).unwrap();
        engine.handle(BusCondition::DataReceived).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::AwaitStop);
        assert!(scheduler.pending().is_empty());
        engine.handle(BusCondition::Stop).unwrap();

        assert_eq!(engine.last_read(), 0x1234);
        assert_eq!(engine.state(), BusState::Idle);
        assert!(engine.is_available());
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
        assert!(scheduler.pending().contains(Event::SensorReadComplete));
        engine.with_controller(|c| {
            assert_eq!(
                c.ops.as_slice(),
                &[
                    Op::Command(0x01),
                    Op::Transmit(0xAA),
                    Op::Transmit(0x13),
                    Op::Command(0x01),
                    Op::Transmit(0xAB),
                    Op::Command(0x04),
                    Op::Command(0x08),
                    Op::Command(0x02),
                ]
            );
        });
    }

    #[test]
    fn write_sends_register_then_msb_first_and_stops_after_last_byte() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);

        engine
            .start(BusRequest::write(0x55, 0x0A, 0x00AB_CDEF, 3))
            .unwrap();
        engine.handle(BusCondition::Ack).unwrap();
        engine.handle(BusCondition::Ack).unwrap();
        engine.handle(BusCondition::Ack).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::WriteData);
        engine.handle(BusCondition::Ack).unwrap();
        assert_eq!(engine.state().phase(), BusPhase::AwaitStop);
        engine.handle(BusCondition::Stop).unwrap();

        engine.with_controller(|c| {
            assert_eq!(
                c.ops.as_slice(),
                &[
                    Op::Command(0x01),
                    Op::Transmit(0xAA),
                    Op::Transmit(0x0A),
                    Op::Transmit(0xAB),
                    Op::Transmit(0xCD),
                    Op::Transmit(0xEF),
                    Op::Command(0x02),
                ]
            );
        });
        assert!(engine.is_available());
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn unexpected_condition_is_reported_without_advancing() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);
        engine.start(BusRequest::write(0x55, 0x0B, 0x11, 1)).unwrap();
        engine.handle(BusCondition::Ack).unwrap();

        let before = engine.state();
        assert_eq!(
            engine.handle(BusCondition::DataReceived),
            Err(BusFault::ProtocolViolation {
                phase: BusPhase::WriteData,
                condition: BusCondition::DataReceived,
            })
        );
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn conditions_before_start_are_violations() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);

        for condition in [BusCondition::Ack, BusCondition::DataReceived, BusCondition::Stop] {
            assert!(matches!(
                engine.handle(condition),
                Err(BusFault::ProtocolViolation {
                    phase: BusPhase::Idle,
                    ..
                })
            ));
        }
        assert_eq!(engine.state(), BusState::Idle);
    }

    #[test]
    fn start_rejects_bad_lengths_and_busy_controller() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);

        assert_eq!(
            engine.start(BusRequest::read(0x55, 0x00, 0)),
            Err(BusFault::InvalidLength(0))
        );
        assert_eq!(
            engine.start(BusRequest::read(0x55, 0x00, 5)),
            Err(BusFault::InvalidLength(5))
        );

        engine.with_controller(|c| c.busy = true);
        assert_eq!(
            engine.start(BusRequest::read(0x55, 0x00, 1)),
            Err(BusFault::NotIdle)
        );
        assert!(engine.is_available());
        assert_eq!(arbiter.votes(EnergyMode::Em2), 0);
    }

    #[test]
    fn interrupt_services_pending_conditions_in_order() {
        let arbiter = EnergyArbiter::new();
        let scheduler = EventScheduler::new();
        let engine = opened(&arbiter, &scheduler);
        engine.start(BusRequest::write(0x55, 0x0B, 0x11, 1)).unwrap();

        engine.with_controller(|c| c.pending = BusConditions::from(BusCondition::Ack));
        engine.on_interrupt().unwrap();
        engine.with_controller(|c| c.pending = BusConditions::from(BusCondition::Ack));
        engine.on_interrupt().unwrap();
        engine.with_controller(|c| c.pending = BusConditions::from(BusCondition::Stop));
        engine.on_interrupt().unwrap();

        assert_eq!(engine.state(), BusState::Idle);
        assert!(engine.is_available());
    }
}
