//! Boot sequence, interrupt dispatch and the superloop.

use cortex_m::interrupt;
use cortex_m::register::primask;
use cortex_m_rt::{entry, exception};
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;

use node_core::app::{Application, Peripherals};
use node_core::bus::BusEngine;
use node_core::scheduler::{Event, EventScheduler, MainLoop};
use node_core::serial::SerialEngine;
use node_core::sleep::EnergyArbiter;
use node_core::timer::TimerDriver;

use crate::hw::gpio::{self, StatusLed};
use crate::hw::i2c::{I2c, Route};
use crate::hw::letimer::Letimer;
use crate::hw::leuart::Leuart;
use crate::hw::sleep::Emu;
use crate::hw::{Irq, cmu};

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Expansion header PC11 (SCL) / PC10 (SDA).
const EXPANSION_ROUTE: Route = Route {
    scl_location: 15,
    sda_location: 15,
};
/// Si1133 on PC5 (SCL) / PC4 (SDA).
const SENSOR_ROUTE: Route = Route {
    scl_location: 17,
    sda_location: 17,
};
/// Fast mode from the 26 MHz peripheral clock at the 6:3 ratio.
const I2C_CLOCK_DIVIDER: u32 = 6;
/// HM-10 module on PF3 (TX) / PF4 (RX).
const SERIAL_BAUD: u32 = 9600;
const SERIAL_LOCATION: u32 = 27;
const PWM_OUT0_LOCATION: u32 = 17;
const PWM_OUT1_LOCATION: u32 = 16;

static SCHEDULER: EventScheduler = EventScheduler::new();
static ARBITER: EnergyArbiter = EnergyArbiter::new();
static EXPANSION_BUS: BusEngine<'static, I2c> =
    BusEngine::new(I2c::I2C0, &ARBITER, &SCHEDULER);
static BUS: BusEngine<'static, I2c> = BusEngine::new(I2c::I2C1, &ARBITER, &SCHEDULER);
static SERIAL: SerialEngine<'static, Leuart> = SerialEngine::new(
    Leuart::LEUART0,
    Some(Event::SerialTxComplete),
    &ARBITER,
    &SCHEDULER,
);
static TIMER: TimerDriver<'static, Letimer> = TimerDriver::new(
    Letimer::letimer0(PWM_OUT0_LOCATION, PWM_OUT1_LOCATION),
    &ARBITER,
    &SCHEDULER,
);

#[entry]
fn main() -> ! {
    let Some(core) = cortex_m::Peripherals::take() else {
        defmt::panic!("runtime: core peripherals already taken");
    };

    cmu::open();
    gpio::open();
    EXPANSION_BUS.with_controller(|i2c| i2c.open(EXPANSION_ROUTE, I2C_CLOCK_DIVIDER));
    EXPANSION_BUS.open();
    BUS.with_controller(|i2c| i2c.open(SENSOR_ROUTE, I2C_CLOCK_DIVIDER));
    SERIAL.with_port(|leuart| leuart.open(SERIAL_BAUD, SERIAL_LOCATION));
    TIMER.with_timer(Letimer::power_up);
    let led = StatusLed::new();
    led.open();

    let mut app = Application::new(
        Peripherals {
            scheduler: &SCHEDULER,
            arbiter: &ARBITER,
            bus: &BUS,
            serial: &SERIAL,
            timer: &TIMER,
        },
        led,
    );
    if let Err(fault) = app.boot() {
        defmt::panic!("runtime: boot failed: {}", fault);
    }
    defmt::info!("runtime: boot complete");

    let mut main_loop = MainLoop::new(&SCHEDULER, &ARBITER, app, Emu::new(core.SCB));
    let fault = main_loop.run();
    defmt::panic!("runtime: {}", fault);
}

#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    match Irq::from_number(irqn) {
        Some(Irq::I2c0) => {
            if let Err(fault) = EXPANSION_BUS.on_interrupt() {
                defmt::panic!("i2c0: {}", fault);
            }
        }
        Some(Irq::I2c1) => {
            if let Err(fault) = BUS.on_interrupt() {
                defmt::panic!("i2c1: {}", fault);
            }
        }
        Some(Irq::Leuart0) => {
            if let Err(fault) = SERIAL.on_interrupt() {
                defmt::panic!("leuart: {}", fault);
            }
        }
        Some(Irq::Letimer0) => TIMER.on_interrupt(),
        None => defmt::panic!("runtime: unexpected interrupt {}", irqn),
    }
}
