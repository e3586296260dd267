//! SX127x chip driver. Unlike SX126x's opcode-framed command set, SX127x
//! is a flat register file addressed directly: the high bit of the first
//! SPI byte selects read (0) or write (1), and the low seven bits are the
//! register address. Register addresses below are the public SX1276/77/
//! 78/79 datasheet map.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use super::{
    config::{pick_pa_ramp_us, LoraConfig},
    driver::RadioChipDriver,
    error::RadioError,
    rxpacket::{RxPacket, MAX_PAYLOAD_LEN},
    timing::sx127x_symbol_offsets,
};

const MAX_BUSY_ITERS: u32 = 100_000;

#[repr(u8)]
#[derive(Clone, Copy)]
enum Register {
    OpMode = 0x01,
    FrfMsb = 0x06,
    FrfMid = 0x07,
    FrfLsb = 0x08,
    PaConfig = 0x09,
    PaRamp = 0x0A,
    Ocp = 0x0B,
    Lna = 0x0C,
    FifoAddrPtr = 0x0D,
    FifoTxBaseAddr = 0x0E,
    FifoRxBaseAddr = 0x0F,
    FifoRxCurrentAddr = 0x10,
    IrqFlagsMask = 0x11,
    IrqFlags = 0x12,
    RxNbBytes = 0x13,
    PktSnrValue = 0x19,
    PktRssiValue = 0x1A,
    ModemConfig1 = 0x1D,
    ModemConfig2 = 0x1E,
    PreambleMsb = 0x20,
    PreambleLsb = 0x21,
    PayloadLength = 0x22,
    ModemConfig3 = 0x26,
    InvertIq = 0x33,
    SyncWord = 0x39,
    InvertIq2 = 0x3B,
    DioMapping1 = 0x40,
    ImageCal = 0x3F,
    Fifo = 0x00,
}

const IMAGE_CAL_AUTO_ON: u8 = 0x80;

const OP_MODE_LONG_RANGE: u8 = 0x80;
const OP_MODE_SLEEP: u8 = 0x00;
const OP_MODE_STDBY: u8 = 0x01;
const OP_MODE_TX: u8 = 0x03;
const OP_MODE_RX_CONTINUOUS: u8 = 0x05;

const IRQ_TX_DONE: u16 = 0x08;
const IRQ_RX_DONE: u16 = 0x40;
const IRQ_CRC_ERR: u16 = 0x20;

/// DS Table 34; ascending by microseconds so `pick_pa_ramp_us` finds the
/// smallest fit. The register field itself is an index, lowest = slowest.
const PA_RAMP_TABLE_US: [u16; 10] = [3400, 2000, 1000, 500, 250, 125, 100, 62, 50, 40];

fn pa_ramp_code(us: u16) -> u8 {
    (PA_RAMP_TABLE_US.len() - 1
        - PA_RAMP_TABLE_US
            .iter()
            .rev()
            .position(|&v| v == us)
            .unwrap_or(0)) as u8
}

pub struct Sx127x<SPI, RESET, BUSY> {
    spi: SPI,
    reset: RESET,
    busy: BUSY,
    sf: u8,
}

impl<SPI, RESET, BUSY> Sx127x<SPI, RESET, BUSY>
where
    SPI: SpiDevice,
    RESET: OutputPin,
    BUSY: InputPin,
{
    pub fn new(spi: SPI, reset: RESET, busy: BUSY) -> Self {
        Self {
            spi,
            reset,
            busy,
            sf: 7,
        }
    }

    fn wait_on_busy(&mut self) -> Result<(), RadioError> {
        let mut i = 0;
        while self.busy.is_high().map_err(|_| RadioError::Spi)? {
            i += 1;
            if i >= MAX_BUSY_ITERS {
                return Err(RadioError::Busy);
            }
        }
        Ok(())
    }

    pub fn reset_pin(&mut self) -> Result<(), RadioError> {
        self.reset.set_low().map_err(|_| RadioError::Spi)?;
        self.reset.set_high().map_err(|_| RadioError::Spi)
    }

    fn write_reg(&mut self, reg: Register, val: u8) -> Result<(), RadioError> {
        self.wait_on_busy()?;
        self.spi
            .write(&[reg as u8 | 0x80, val])
            .map_err(|_| RadioError::Spi)
    }

    fn read_reg(&mut self, reg: Register) -> Result<u8, RadioError> {
        self.wait_on_busy()?;
        let mut buf = [reg as u8 & 0x7F, 0];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|_| RadioError::Spi)?;
        Ok(buf[1])
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), RadioError> {
        self.write_reg(Register::OpMode, OP_MODE_LONG_RANGE | mode)
    }
}

impl<SPI, RESET, BUSY> RadioChipDriver for Sx127x<SPI, RESET, BUSY>
where
    SPI: SpiDevice,
    RESET: OutputPin,
    BUSY: InputPin,
{
    const IRQ_RX_COMPLETE: u16 = IRQ_RX_DONE;
    const IRQ_TX_COMPLETE: u16 = IRQ_TX_DONE;
    const MIN_SF: u8 = 7;

    fn standby(&mut self) -> Result<(), RadioError> {
        self.set_mode(OP_MODE_STDBY)
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.set_mode(OP_MODE_SLEEP)
    }

    fn configure(&mut self, cfg: &LoraConfig) -> Result<(), RadioError> {
        cfg.validate_common().map_err(|_| RadioError::Spi)?;
        self.sf = cfg.sf;

        self.set_mode(OP_MODE_SLEEP)?;
        self.write_reg(Register::FifoTxBaseAddr, 0)?;
        self.write_reg(Register::FifoRxBaseAddr, 0)?;

        let lna = self.read_reg(Register::Lna)?;
        self.write_reg(Register::Lna, lna | (cfg.rx_boost as u8) * 0x03)?;

        let frf = ((cfg.freq_khz as u64 * 1_000 * (1u64 << 19)) / 32_000_000) as u32;
        self.write_reg(Register::FrfMsb, (frf >> 16) as u8)?;
        self.write_reg(Register::FrfMid, (frf >> 8) as u8)?;
        self.write_reg(Register::FrfLsb, frf as u8)?;

        let bw_code = bandwidth_code(cfg.bw.hz());
        let cr_code = cfg.coding_rate - 4;
        self.write_reg(
            Register::ModemConfig1,
            (bw_code << 4) | (cr_code << 1) | (cfg.implicit_header as u8),
        )?;

        let ldr_en = super::timing::t_sym_us(cfg.sf, cfg.bw.hz()) >= 16_000;
        self.write_reg(
            Register::ModemConfig2,
            (cfg.sf << 4) | ((cfg.crc_en as u8) << 2),
        )?;
        self.write_reg(Register::ModemConfig3, (ldr_en as u8) << 3)?;

        self.write_reg(Register::PreambleMsb, (cfg.preamble_len >> 8) as u8)?;
        self.write_reg(Register::PreambleLsb, cfg.preamble_len as u8)?;

        self.write_reg(Register::SyncWord, cfg.syncword)?;

        let invert = if cfg.invert_iq_rx { 0x67 } else { 0x27 };
        self.write_reg(Register::InvertIq, invert)?;
        self.write_reg(
            Register::InvertIq2,
            if cfg.invert_iq_tx { 0x19 } else { 0x1D },
        )?;

        let ramp_us = pick_pa_ramp_us(cfg.pa_ramp_us, &PA_RAMP_TABLE_US).map_err(|_| RadioError::Spi)?;
        self.write_reg(Register::PaRamp, pa_ramp_code(ramp_us))?;
        self.write_reg(
            Register::PaConfig,
            0x80 | (cfg.output_power_dbm.clamp(2, 17) as u8 - 2),
        )?;

        self.write_reg(Register::Ocp, 0x20 | 0x0B)?;
        self.write_reg(Register::DioMapping1, 0b0100_0000)?;

        if cfg.auto_image_cal {
            let cal = self.read_reg(Register::ImageCal)?;
            self.write_reg(Register::ImageCal, cal | IMAGE_CAL_AUTO_ON)?;
        }

        self.set_mode(OP_MODE_STDBY)
    }

    fn prepare_send(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.write_reg(Register::FifoAddrPtr, 0)?;
        self.write_reg(Register::PayloadLength, payload.len() as u8)?;
        self.wait_on_busy()?;
        let mut buf = heapless::Vec::<u8, { MAX_PAYLOAD_LEN + 1 }>::new();
        let _ = buf.push(Register::Fifo as u8 | 0x80);
        let _ = buf.extend_from_slice(payload);
        self.spi.write(&buf).map_err(|_| RadioError::Spi)
    }

    fn start_send(&mut self) -> Result<bool, RadioError> {
        self.set_mode(OP_MODE_TX)?;
        Ok(true)
    }

    fn start_recv(&mut self) -> Result<(), RadioError> {
        self.set_mode(OP_MODE_RX_CONTINUOUS)
    }

    fn get_irq_flags(&mut self) -> Result<u16, RadioError> {
        Ok(self.read_reg(Register::IrqFlags)? as u16)
    }

    fn clear_irq(&mut self, mask: u16) -> Result<(), RadioError> {
        self.write_reg(Register::IrqFlags, mask as u8)
    }

    fn read_packet(&mut self, flags: u16) -> Result<RxPacket, RadioError> {
        let len = self.read_reg(Register::RxNbBytes)?;
        let start = self.read_reg(Register::FifoRxCurrentAddr)?;
        self.write_reg(Register::FifoAddrPtr, start)?;

        let mut payload = heapless::Vec::<u8, MAX_PAYLOAD_LEN>::new();
        for _ in 0..len {
            let byte = self.read_reg(Register::Fifo)?;
            let _ = payload.push(byte);
        }

        let snr_raw = self.read_reg(Register::PktSnrValue)? as i8;
        let rssi_raw = self.read_reg(Register::PktRssiValue)?;

        Ok(RxPacket {
            payload,
            ticks_ms: 0,
            snr: snr_raw as i16 * 25,
            rssi: -157 + rssi_raw as i16,
            valid_crc: flags as u8 & IRQ_CRC_ERR as u8 == 0,
        })
    }

    fn rx_flags_success(&self, flags: u16) -> bool {
        flags & IRQ_CRC_ERR == 0
    }

    fn is_idle(&mut self) -> Result<bool, RadioError> {
        Ok(!self.busy.is_high().map_err(|_| RadioError::Spi)?)
    }

    fn symbol_offsets(&self) -> (i8, i8) {
        sx127x_symbol_offsets()
    }
}

fn bandwidth_code(hz: u32) -> u8 {
    match hz {
        7_800 => 0,
        10_400 => 1,
        15_600 => 2,
        20_800 => 3,
        31_250 => 4,
        41_700 => 5,
        62_500 => 6,
        125_000 => 7,
        250_000 => 8,
        _ => 9, // 500 kHz
    }
}
