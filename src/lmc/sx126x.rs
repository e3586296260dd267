//! SX126x chip driver. Register I/O follows the wait-on-busy-then-toggle-CS
//! shape used throughout this crate's SPI layer, generalized from a
//! concrete MCU HAL's pin/DMA types to the portable `embedded-hal` traits
//! so the same driver compiles against any HAL that implements them.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use heapless::Vec;

use super::{
    config::{pick_pa_ramp_us, LoraConfig},
    driver::RadioChipDriver,
    error::RadioError,
    rxpacket::{RxPacket, MAX_PAYLOAD_LEN},
    timing::sx126x_symbol_offsets,
};

/// Bounds the busy-pin poll so a wedged chip surfaces as an error instead
/// of hanging the foreground loop forever.
const MAX_BUSY_ITERS: u32 = 100_000;

#[repr(u8)]
#[derive(Clone, Copy)]
enum OpCode {
    SetSleep = 0x84,
    SetStandby = 0x80,
    SetTx = 0x83,
    SetRx = 0x82,
    SetRxTxFallbackMode = 0x93,
    SetPacketType = 0x8A,
    SetRfFrequency = 0x86,
    SetTxParams = 0x8E,
    SetModulationParams = 0x8B,
    SetPacketParams = 0x8C,
    SetDioIrqParams = 0x08,
    GetIrqStatus = 0x12,
    ClearIrqStatus = 0x02,
    SetBufferBaseAddress = 0x8F,
    WriteBuffer = 0x0E,
    ReadBuffer = 0x1E,
    WriteRegister = 0x0D,
    GetRxBufferStatus = 0x13,
    GetPacketStatus = 0x14,
    SetRegulatorMode = 0x96,
    SetDio2AsRfSwitchCtrl = 0x9D,
    SetDio3AsTcxoCtrl = 0x97,
}

const PACKET_TYPE_LORA: u8 = 0x01;

/// DS 13.4.1 table: LoRa sync word register, MSB/LSB pair.
const REG_LORA_SYNCWORD_MSB: u16 = 0x0740;

/// DS 13.4.6; ascending so `pick_pa_ramp_us` can find the smallest fit.
const PA_RAMP_TABLE_US: [u16; 8] = [10, 20, 40, 80, 200, 800, 1700, 3400];

fn pa_ramp_code(us: u16) -> u8 {
    PA_RAMP_TABLE_US
        .iter()
        .position(|&v| v == us)
        .unwrap_or(0) as u8
}

const IRQ_TX_DONE: u16 = 1 << 0;
const IRQ_RX_DONE: u16 = 1 << 1;
const IRQ_CRC_ERR: u16 = 1 << 6;
const IRQ_ALL: u16 = 0xFFFF;

pub struct Sx126x<SPI, RESET, BUSY> {
    spi: SPI,
    reset: RESET,
    busy: BUSY,
    sf: u8,
    tx_len: u8,
    preamble_len: u16,
    implicit_header: bool,
    crc_en: bool,
    invert_iq_rx: bool,
    invert_iq_tx: bool,
}

impl<SPI, RESET, BUSY> Sx126x<SPI, RESET, BUSY>
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
            tx_len: 0,
            preamble_len: 8,
            implicit_header: false,
            crc_en: true,
            invert_iq_rx: false,
            invert_iq_tx: false,
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

    fn write_cmd(&mut self, op: OpCode, params: &[u8]) -> Result<(), RadioError> {
        self.wait_on_busy()?;
        let mut buf: Vec<u8, 16> = Vec::new();
        let _ = buf.push(op as u8);
        let _ = buf.extend_from_slice(params);
        self.spi.write(&buf).map_err(|_| RadioError::Spi)
    }

    fn read_cmd(&mut self, op: OpCode, out: &mut [u8]) -> Result<(), RadioError> {
        self.wait_on_busy()?;
        let mut buf: Vec<u8, 260> = Vec::new();
        let _ = buf.push(op as u8);
        let _ = buf.push(0);
        let _ = buf.resize(2 + out.len(), 0);
        self.spi.transfer_in_place(&mut buf).map_err(|_| RadioError::Spi)?;
        out.copy_from_slice(&buf[2..2 + out.len()]);
        Ok(())
    }

    pub fn reset_pin(&mut self) -> Result<(), RadioError> {
        self.reset.set_low().map_err(|_| RadioError::Spi)?;
        self.reset.set_high().map_err(|_| RadioError::Spi)
    }

    fn write_register(&mut self, addr: u16, data: &[u8]) -> Result<(), RadioError> {
        let [ah, al] = addr.to_be_bytes();
        self.wait_on_busy()?;
        let mut buf: Vec<u8, 16> = Vec::new();
        let _ = buf.push(OpCode::WriteRegister as u8);
        let _ = buf.push(ah);
        let _ = buf.push(al);
        let _ = buf.extend_from_slice(data);
        self.spi.write(&buf).map_err(|_| RadioError::Spi)
    }

    fn set_dio_irq_params(&mut self, mask: u16) -> Result<(), RadioError> {
        let [mh, ml] = mask.to_be_bytes();
        self.write_cmd(
            OpCode::SetDioIrqParams,
            &[mh, ml, mh, ml, 0, 0, 0, 0],
        )
    }

    /// The IQ-invert field lives in the same packet-params word as
    /// preamble/header/length/CRC, and the chip only holds one value at a
    /// time. RX and TX can ask for independent polarities (spec `LoraConfig`
    /// has both `invert_iq_rx` and `invert_iq_tx`), so this is reissued with
    /// the direction-appropriate bit right before each `start_send`/
    /// `start_recv` rather than fixed once in `configure`.
    fn set_packet_params(&mut self, invert_iq: bool) -> Result<(), RadioError> {
        self.write_cmd(
            OpCode::SetPacketParams,
            &[
                (self.preamble_len >> 8) as u8,
                self.preamble_len as u8,
                self.implicit_header as u8,
                self.tx_len,
                self.crc_en as u8,
                invert_iq as u8,
            ],
        )
    }
}

impl<SPI, RESET, BUSY> RadioChipDriver for Sx126x<SPI, RESET, BUSY>
where
    SPI: SpiDevice,
    RESET: OutputPin,
    BUSY: InputPin,
{
    const IRQ_RX_COMPLETE: u16 = IRQ_RX_DONE;
    const IRQ_TX_COMPLETE: u16 = IRQ_TX_DONE;
    const MIN_SF: u8 = 5;

    fn standby(&mut self) -> Result<(), RadioError> {
        self.write_cmd(OpCode::SetStandby, &[0])
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.write_cmd(OpCode::SetSleep, &[0])
    }

    fn configure(&mut self, cfg: &LoraConfig) -> Result<(), RadioError> {
        cfg.validate_common().map_err(|_| RadioError::Spi)?;
        self.sf = cfg.sf;

        self.write_cmd(OpCode::SetRegulatorMode, &[1])?;
        self.write_cmd(OpCode::SetPacketType, &[PACKET_TYPE_LORA])?;

        if let Some(_mv) = cfg.tcxo_millivolts {
            self.write_cmd(OpCode::SetDio3AsTcxoCtrl, &[0x02, 0, 0, 100])?;
        }
        if cfg.dio2_rf_sw {
            self.write_cmd(OpCode::SetDio2AsRfSwitchCtrl, &[1])?;
        }

        let freq_reg = ((cfg.freq_khz as u64 * 1_000 * (1u64 << 25)) / 32_000_000) as u32;
        self.write_cmd(OpCode::SetRfFrequency, &freq_reg.to_be_bytes())?;

        let bw_code = bandwidth_code(cfg.bw.hz());
        self.write_cmd(
            OpCode::SetModulationParams,
            &[
                cfg.sf,
                bw_code,
                cfg.coding_rate - 4,
                (super::timing::t_sym_us(cfg.sf, cfg.bw.hz()) >= 16_000) as u8,
            ],
        )?;

        self.preamble_len = cfg.preamble_len;
        self.implicit_header = cfg.implicit_header;
        self.crc_en = cfg.crc_en;
        self.invert_iq_rx = cfg.invert_iq_rx;
        self.invert_iq_tx = cfg.invert_iq_tx;
        self.set_packet_params(cfg.invert_iq_rx)?;

        let ramp_us = pick_pa_ramp_us(cfg.pa_ramp_us, &PA_RAMP_TABLE_US).map_err(|_| RadioError::Spi)?;
        self.write_cmd(
            OpCode::SetTxParams,
            &[cfg.output_power_dbm as u8, pa_ramp_code(ramp_us)],
        )?;

        self.write_cmd(OpCode::SetBufferBaseAddress, &[0, 0])?;

        // Public/private LoRa sync word nibbles (DS 13.4.1), written across
        // the two adjacent sync-word registers.
        let sw = cfg.syncword;
        self.write_register(
            REG_LORA_SYNCWORD_MSB,
            &[(sw & 0xF0) | 0x04, (sw << 4) | 0x04],
        )?;

        self.set_dio_irq_params(IRQ_ALL)
    }

    fn prepare_send(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.tx_len = payload.len() as u8;
        self.wait_on_busy()?;
        let mut buf: Vec<u8, 260> = Vec::new();
        let _ = buf.push(OpCode::WriteBuffer as u8);
        let _ = buf.push(0);
        let _ = buf.extend_from_slice(payload);
        self.spi.write(&buf).map_err(|_| RadioError::Spi)
    }

    fn start_send(&mut self) -> Result<bool, RadioError> {
        let invert_iq_tx = self.invert_iq_tx;
        self.set_packet_params(invert_iq_tx)?;
        self.write_cmd(OpCode::SetTx, &[0, 0, 0])?;
        Ok(true)
    }

    fn start_recv(&mut self) -> Result<(), RadioError> {
        let invert_iq_rx = self.invert_iq_rx;
        self.set_packet_params(invert_iq_rx)?;
        // 0xFFFFFF (DS 13.4.4) means "continuous" with no hardware timeout.
        self.write_cmd(OpCode::SetRx, &[0xFF, 0xFF, 0xFF])
    }

    fn get_irq_flags(&mut self) -> Result<u16, RadioError> {
        let mut buf = [0u8; 2];
        self.read_cmd(OpCode::GetIrqStatus, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn clear_irq(&mut self, mask: u16) -> Result<(), RadioError> {
        let [mh, ml] = mask.to_be_bytes();
        self.write_cmd(OpCode::ClearIrqStatus, &[mh, ml])
    }

    fn read_packet(&mut self, flags: u16) -> Result<RxPacket, RadioError> {
        let mut buf_status = [0u8; 2];
        self.read_cmd(OpCode::GetRxBufferStatus, &mut buf_status)?;
        let len = buf_status[0];
        let start = buf_status[1];

        self.wait_on_busy()?;
        let mut xfer: Vec<u8, { MAX_PAYLOAD_LEN + 3 }> = Vec::new();
        let _ = xfer.push(OpCode::ReadBuffer as u8);
        let _ = xfer.push(start);
        let _ = xfer.push(0);
        let _ = xfer.resize(3 + len as usize, 0);
        self.spi
            .transfer_in_place(&mut xfer)
            .map_err(|_| RadioError::Spi)?;

        let mut payload: Vec<u8, MAX_PAYLOAD_LEN> = Vec::new();
        let _ = payload.extend_from_slice(&xfer[3..3 + len as usize]);

        let mut status = [0u8; 4];
        self.read_cmd(OpCode::GetPacketStatus, &mut status)?;

        Ok(RxPacket {
            payload,
            ticks_ms: 0,
            rssi: -(status[0] as i16) / 2,
            snr: status[1] as i8 as i16,
            valid_crc: flags & IRQ_CRC_ERR == 0,
        })
    }

    fn rx_flags_success(&self, flags: u16) -> bool {
        flags & IRQ_CRC_ERR == 0
    }

    fn is_idle(&mut self) -> Result<bool, RadioError> {
        Ok(!self.busy.is_high().map_err(|_| RadioError::Spi)?)
    }

    fn symbol_offsets(&self) -> (i8, i8) {
        sx126x_symbol_offsets(self.sf)
    }
}

fn bandwidth_code(hz: u32) -> u8 {
    match hz {
        7_800 => 0x00,
        10_400 => 0x08,
        15_600 => 0x01,
        20_800 => 0x09,
        31_250 => 0x02,
        41_700 => 0x0A,
        62_500 => 0x03,
        125_000 => 0x04,
        250_000 => 0x05,
        _ => 0x06, // 500 kHz
    }
}
