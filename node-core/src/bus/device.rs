use crate::scheduler::Event;

use super::{BusController, BusEngine, BusFault, BusRequest};

/// A register-addressed peripheral at a fixed address on one bus.
pub struct RegisterDevice<'a, C> {
    engine: &'a BusEngine<'a, C>,
    address: u8,
}

impl<'a, C> RegisterDevice<'a, C>
where
    C: BusController,
{
    pub const fn new(engine: &'a BusEngine<'a, C>, address: u8) -> Self {
        Self { engine, address }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Starts a read of `byte_count` bytes; collect the word with
    /// [`RegisterDevice::last_read`] once `completion` fires.
    pub fn read(
        &self,
        byte_count: u8,
        register_address: u8,
        completion: Option<Event>,
    ) -> Result<(), BusFault> {
        self.engine.start(
            BusRequest::read(self.address, register_address, byte_count).with_completion(completion),
        )
    }

    /// Starts a write of the low `byte_count` bytes of `value`.
    pub fn write(
        &self,
        byte_count: u8,
        register_address: u8,
        value: u32,
        completion: Option<Event>,
    ) -> Result<(), BusFault> {
        self.engine.start(
            BusRequest::write(self.address, register_address, value, byte_count)
                .with_completion(completion),
        )
    }

    /// Reads and waits for the result.
    pub fn read_blocking(&self, byte_count: u8, register_address: u8) -> Result<u32, BusFault> {
        self.read(byte_count, register_address, None)?;
        self.engine.wait_until_available();
        Ok(self.engine.last_read())
    }

    /// Writes and waits for the STOP.
    pub fn write_blocking(
        &self,
        byte_count: u8,
        register_address: u8,
        value: u32,
    ) -> Result<(), BusFault> {
        self.write(byte_count, register_address, value, None)?;
        self.engine.wait_until_available();
        Ok(())
    }

    pub fn last_read(&self) -> u32 {
        self.engine.last_read()
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }
}
