// Si1133 register map and command set.

pub const PART_ID: u8 = 0x00;
pub const INPUT0: u8 = 0x0A;
pub const COMMAND: u8 = 0x0B;
pub const RESPONSE0: u8 = 0x11;
pub const HOSTOUT0: u8 = 0x13;

/// Low nibble of `RESPONSE0`.
pub const RESPONSE0_CMD_CTR_MASK: u8 = 0x0F;

pub const CMD_RESET_CMD_CTR: u8 = 0x00;
pub const CMD_FORCE: u8 = 0x11;
pub const CMD_PARAM_SET: u8 = 0x80;

// Parameter table addresses, OR'd into `CMD_PARAM_SET`.
pub const PARAM_CHAN_LIST: u8 = 0x01;
pub const PARAM_ADC_CONFIG0: u8 = 0x02;

/// `ADCMUX` selection for the large white photodiode.
pub const ADC_MUX_WHITE: u8 = 0b0_1011;

/// Channel list with only channel 0 enabled.
pub const CHAN_LIST_CHANNEL0: u8 = 0b00_0001;

/// Value read from `PART_ID` on a Si1133.
pub const PART_ID_SI1133: u8 = 0x33;
