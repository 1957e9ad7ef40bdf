use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant as HostInstant};

use node_core::app::{Application, LightLevel, Peripherals};
use node_core::bus::BusEngine;
use node_core::fault::Fault;
use node_core::scheduler::{Event, EventScheduler, MainLoop, Pass};
use node_core::serial::SerialEngine;
use node_core::sleep::{ALL_ENERGY_MODES, EnergyArbiter, EnergyMode};
use node_core::timer::{TimerCondition, TimerDriver};

use crate::command::{self, Command};
use crate::hardware::{CapturedSerial, ConsoleLed, HostSleeper, SensorBus, SimTimer};

/// Light level the simulated sensor reports until `light` changes it.
pub const DEFAULT_LIGHT: u16 = 250;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "run",
        "run [periods]                  - advance the timer, one measurement per period",
    ),
    (
        "read",
        "read <reg> <count>             - read 1-4 bytes from a sensor register",
    ),
    (
        "write",
        "write <reg> <value> [count]    - write 1-4 bytes to a sensor register",
    ),
    (
        "send",
        "send <text>                    - transmit text on the serial link",
    ),
    (
        "light",
        "light <value>                  - set the level the sensor measures next",
    ),
    (
        "status",
        "status                         - display node state",
    ),
    (
        "help",
        "help                           - show this list",
    ),
    (
        "exit",
        "exit                           - close the session",
    ),
];

type NodeApp = Application<'static, SensorBus, CapturedSerial, SimTimer, ConsoleLed>;

#[derive(Debug)]
pub enum SessionError {
    Io(io::Error),
    Boot(Fault),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Io(err) => write!(f, "transcript: {err}"),
            SessionError::Boot(fault) => write!(f, "boot failed: {fault}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(err)
    }
}

/// Why the node stopped servicing events.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Halt {
    Handler(Fault),
    Interrupt(String),
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Handler(fault) => write!(f, "handler {fault}"),
            Halt::Interrupt(detail) => write!(f, "interrupt {detail}"),
        }
    }
}

/// Process-lifetime peripheral singletons, as the firmware holds them in
/// statics.
#[derive(Clone, Copy)]
struct Node {
    scheduler: &'static EventScheduler,
    arbiter: &'static EnergyArbiter,
    bus: &'static BusEngine<'static, SensorBus>,
    serial: &'static SerialEngine<'static, CapturedSerial>,
    timer: &'static TimerDriver<'static, SimTimer>,
}

impl Node {
    fn leak(light: u16) -> Self {
        let scheduler: &'static EventScheduler = Box::leak(Box::new(EventScheduler::new()));
        let arbiter: &'static EnergyArbiter = Box::leak(Box::new(EnergyArbiter::new()));
        Self {
            scheduler,
            arbiter,
            bus: Box::leak(Box::new(BusEngine::new(
                SensorBus::new(light),
                arbiter,
                scheduler,
            ))),
            serial: Box::leak(Box::new(SerialEngine::new(
                CapturedSerial::default(),
                Some(Event::SerialTxComplete),
                arbiter,
                scheduler,
            ))),
            timer: Box::leak(Box::new(TimerDriver::new(
                SimTimer::default(),
                arbiter,
                scheduler,
            ))),
        }
    }

    fn peripherals(self) -> Peripherals<'static, SensorBus, CapturedSerial, SimTimer> {
        Peripherals {
            scheduler: self.scheduler,
            arbiter: self.arbiter,
            bus: self.bus,
            serial: self.serial,
            timer: self.timer,
        }
    }

    /// No transaction in flight and nothing queued.
    ///
    /// Availability is sampled before the pending set: engines release their
    /// slot and post completion inside one critical section.
    fn is_quiet(self) -> bool {
        self.bus.is_available() && self.serial.is_available() && self.scheduler.pending().is_empty()
    }
}

/// Thread standing in for the NVIC: services bus and serial interrupts.
struct InterruptLine {
    shutdown: Arc<AtomicBool>,
    faults: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptLine {
    fn spawn(node: Node) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let faults = Arc::new(Mutex::new(Vec::new()));
        let handle = thread::spawn({
            let shutdown = Arc::clone(&shutdown);
            let faults = Arc::clone(&faults);
            move || {
                while !shutdown.load(Ordering::Acquire) {
                    let mut serviced = false;
                    if node.bus.with_controller(|bus| bus.has_pending()) {
                        serviced = true;
                        if let Err(fault) = node.bus.on_interrupt() {
                            record(&faults, format!("bus: {fault}"));
                        }
                    }
                    if node.serial.with_port(|port| port.has_pending()) {
                        serviced = true;
                        if let Err(fault) = node.serial.on_interrupt() {
                            record(&faults, format!("serial: {fault}"));
                        }
                    }
                    if !serviced {
                        thread::yield_now();
                    }
                }
            }
        });

        Self {
            shutdown,
            faults,
            handle: Some(handle),
        }
    }

    fn take_fault(&self) -> Option<String> {
        let mut faults = self.faults.lock().ok()?;
        if faults.is_empty() {
            None
        } else {
            Some(faults.remove(0))
        }
    }
}

impl Drop for InterruptLine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn record(faults: &Mutex<Vec<String>>, detail: String) {
    if let Ok(mut faults) = faults.lock() {
        faults.push(detail);
    }
}

pub struct Session {
    node: Node,
    main_loop: MainLoop<'static, NodeApp, HostSleeper>,
    interrupts: InterruptLine,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    periods: u64,
    led_on: bool,
    reported_sleep: Option<EnergyMode>,
    halted: Option<Halt>,
}

impl Session {
    /// Wires a fresh node to simulated peripherals. Nothing runs until
    /// [`Session::boot`].
    pub fn new(light: u16, transcript: Option<&Path>) -> Result<Self, SessionError> {
        let transcript = transcript.map(TranscriptLogger::create).transpose()?;
        let node = Node::leak(light);
        let interrupts = InterruptLine::spawn(node);
        let app = Application::new(node.peripherals(), ConsoleLed::default());
        let main_loop = MainLoop::new(node.scheduler, node.arbiter, app, HostSleeper::default());

        Ok(Self {
            node,
            main_loop,
            interrupts,
            transcript,
            started_at: HostInstant::now(),
            periods: 0,
            led_on: false,
            reported_sleep: None,
            halted: None,
        })
    }

    /// Runs the boot sequence and the passes that follow it.
    pub fn boot(&mut self) -> Result<Vec<String>, SessionError> {
        self.main_loop
            .handler_mut()
            .boot()
            .map_err(SessionError::Boot)?;

        let mut lines = vec![String::from("boot: sensor configured, timer armed")];
        self.settle_or_halt(&mut lines);
        let elapsed = self.started_at.elapsed();
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match command::parse(trimmed) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => Vec::new(),
            Err(err) => vec![format!("ERR syntax {err}")],
        };
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    pub fn halted(&self) -> Option<&Halt> {
        self.halted.as_ref()
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Help => HELP_TOPICS
                .iter()
                .map(|(_, line)| (*line).to_string())
                .collect(),
            Command::Status => self.status(),
            Command::Exit => vec![String::from("Session closed.")],
            _ if self.halted.is_some() => {
                let halt = self.halted.as_ref().map(ToString::to_string);
                vec![format!("ERR node halted: {}", halt.unwrap_or_default())]
            }
            Command::Run { periods } => self.run(periods),
            Command::Read { register, count } => self.read(register, count),
            Command::Write {
                register,
                value,
                count,
            } => self.write(register, value, count),
            Command::Send { text } => self.send(&text),
            Command::Light { value } => {
                self.node.bus.with_controller(|bus| bus.set_light(value));
                vec![format!("OK light = {value}")]
            }
        }
    }

    fn run(&mut self, periods: u32) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..periods {
            for condition in [TimerCondition::CompareB, TimerCondition::Underflow] {
                if !self.node.timer.with_timer(|timer| timer.elapse(condition)) {
                    lines.push(String::from("ERR timer stopped"));
                    return lines;
                }
                self.node.timer.on_interrupt();
                if !self.settle_or_halt(&mut lines) {
                    return lines;
                }
            }
            self.periods += 1;
        }
        lines
    }

    fn read(&self, register: u8, count: u8) -> Vec<String> {
        let device = self.main_loop.handler().sensor().device();
        match device.read_blocking(count, register) {
            Ok(value) => {
                let width = usize::from(count) * 2;
                vec![format!("OK read 0x{register:02X} = 0x{value:0width$X}")]
            }
            Err(fault) => vec![format!("ERR bus {fault}")],
        }
    }

    fn write(&self, register: u8, value: u32, count: u8) -> Vec<String> {
        let device = self.main_loop.handler().sensor().device();
        match device.write_blocking(count, register, value) {
            Ok(()) => vec![format!("OK write 0x{register:02X} <- 0x{value:X}")],
            Err(fault) => vec![format!("ERR bus {fault}")],
        }
    }

    fn send(&mut self, text: &str) -> Vec<String> {
        if let Err(fault) = self.node.serial.transmit(text) {
            return vec![format!("ERR serial {fault}")];
        }
        let mut lines = Vec::new();
        self.settle_or_halt(&mut lines);
        lines
    }

    fn status(&self) -> Vec<String> {
        let handler = self.main_loop.handler();
        let sleeper = self.main_loop.sleeper();
        let (transactions, bytes) = self.node.bus.with_controller(|bus| bus.traffic());
        let light = self.node.bus.with_controller(|bus| bus.light());
        let votes: Vec<String> = ALL_ENERGY_MODES
            .iter()
            .map(|mode| format!("{mode}={}", self.node.arbiter.votes(*mode)))
            .collect();

        let mut lines = vec![
            format!("periods: {}", self.periods),
            format!(
                "timer: {}",
                if self.node.timer.is_running() {
                    "running"
                } else {
                    "stopped"
                }
            ),
            format!("led: {}", if handler.indicator().is_on() { "on" } else { "off" }),
            format!("sensor light: {light}"),
            match handler.last_level() {
                Some(LightLevel::Dark(value)) => format!("last reading: {value} (dark)"),
                Some(LightLevel::Light(value)) => format!("last reading: {value} (light)"),
                None => String::from("last reading: none"),
            },
            format!("bus: {transactions} transactions, {bytes} bytes"),
            format!("votes: {}", votes.join(" ")),
            match sleeper.last() {
                Some(mode) => format!("sleep: {mode} ({} entries)", sleeper.entries()),
                None => String::from("sleep: never"),
            },
        ];
        if let Some(halt) = &self.halted {
            lines.push(format!("halted: {halt}"));
        }
        lines
    }

    /// Services passes until the node is quiet. Returns `false` and latches
    /// the halt once something faults.
    fn settle_or_halt(&mut self, lines: &mut Vec<String>) -> bool {
        match self.settle(lines) {
            Ok(()) => true,
            Err(halt) => {
                lines.push(format!("FAULT {halt}"));
                self.halted = Some(halt);
                false
            }
        }
    }

    fn settle(&mut self, lines: &mut Vec<String>) -> Result<(), Halt> {
        loop {
            if let Some(detail) = self.interrupts.take_fault() {
                return Err(Halt::Interrupt(detail));
            }
            // Only the main loop starts transfers, so a quiet node stays
            // quiet through the pass and its sleep decision is final.
            let quiet = self.node.is_quiet();
            let pass = self.main_loop.service().map_err(Halt::Handler)?;
            self.collect(lines);
            if let Pass::Slept(_) = pass {
                if quiet {
                    break;
                }
                thread::yield_now();
            }
        }

        let sleep = self.main_loop.sleeper().last();
        if sleep != self.reported_sleep {
            if let Some(mode) = sleep {
                lines.push(format!("sleep {mode}"));
            }
            self.reported_sleep = sleep;
        }
        Ok(())
    }

    /// The LED is sampled first: a handler sets it before queueing the
    /// report that follows it.
    fn collect(&mut self, lines: &mut Vec<String>) {
        let led_on = self.main_loop.handler().indicator().is_on();
        if led_on != self.led_on {
            lines.push(format!("LED {}", if led_on { "on" } else { "off" }));
            self.led_on = led_on;
        }
        for frame in self.node.serial.with_port(CapturedSerial::drain_finished) {
            lines.push(format!("TX {frame}"));
        }
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Sensor node emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}
