//! LoRa time-on-air calculator. Pure integer arithmetic throughout: the
//! `×4` scaling on the symbol count keeps the 4.25-symbol fixed preamble
//! exact without fractional arithmetic, which matters on targets with no
//! FPU.

/// Symbol period in microseconds for a given spreading factor and bandwidth.
pub const fn t_sym_us(sf: u8, bw_hz: u32) -> u32 {
    (1_000_000u64 * (1u64 << sf as u32) / bw_hz as u64) as u32
}

/// Low-data-rate optimization is mandated once the symbol period crosses
/// this threshold.
pub const fn ldr_enabled(t_sym_us: u32) -> bool {
    t_sym_us >= 16_000
}

/// Bits carried by the payload, header, and CRC, after subtracting the
/// modem's fixed per-symbol framing overhead. Saturates at 0 rather than
/// going negative for degenerate (very short) payloads.
pub fn payload_bits(
    sf: u8,
    cr_denom: u8,
    crc_en: bool,
    implicit_header: bool,
    payload_len: u8,
    b_o: i8,
) -> u32 {
    let _ = cr_denom;
    let crc_bits: i32 = if crc_en { 16 } else { 0 };
    let header_bits: i32 = if implicit_header { 0 } else { 20 };
    let bits = 8 * payload_len as i32 + crc_bits - 4 * sf as i32 + 8 + b_o as i32 + header_bits;
    bits.max(0) as u32
}

/// Raw bits encodable per LoRa symbol, after the low-data-rate-optimize
/// discount.
pub const fn bits_per_symbol(sf: u8, ldr_en: bool) -> u32 {
    4 * (sf as u32 - 2 * ldr_en as u32)
}

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// The on-air symbol count, scaled by 4 so the 4.25-symbol fixed preamble
/// contributes an exact integer (17 = 4 * 4.25).
pub fn n_symbols_x4(
    sf: u8,
    bw_hz: u32,
    cr_denom: u8,
    crc_en: bool,
    implicit_header: bool,
    preamble_len: u16,
    payload_len: u8,
    s_o: i8,
    b_o: i8,
) -> u32 {
    let t_sym = t_sym_us(sf, bw_hz);
    let ldr_en = ldr_enabled(t_sym);
    let bits = payload_bits(sf, cr_denom, crc_en, implicit_header, payload_len, b_o);
    let bps = bits_per_symbol(sf, ldr_en);
    let symbols = ceil_div(bits, bps) * cr_denom as u32;
    17 + 4 * (preamble_len as u32 + s_o as u32 + 8 + symbols)
}

/// Total transmission duration in microseconds for the given configuration
/// and payload length.
pub fn time_on_air_us(
    sf: u8,
    bw_hz: u32,
    cr_denom: u8,
    crc_en: bool,
    implicit_header: bool,
    preamble_len: u16,
    payload_len: u8,
    s_o: i8,
    b_o: i8,
) -> u32 {
    let t_sym = t_sym_us(sf, bw_hz);
    let n_x4 = n_symbols_x4(
        sf,
        bw_hz,
        cr_denom,
        crc_en,
        implicit_header,
        preamble_len,
        payload_len,
        s_o,
        b_o,
    );
    t_sym * n_x4 / 4
}

/// Chip-specific symbol offset pair `(s_o, b_o)`. SX127x is always
/// `(0, 0)`; SX126x is `(0, 0)` for SF >= 7 and `(2, -8)` for SF in
/// `{5, 6}` (those two spreading factors don't exist on SX127x).
pub const fn sx126x_symbol_offsets(sf: u8) -> (i8, i8) {
    if sf <= 6 { (2, -8) } else { (0, 0) }
}

pub const fn sx127x_symbol_offsets() -> (i8, i8) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_sx127x_sf8() {
        let (s_o, b_o) = sx127x_symbol_offsets();
        assert_eq!(t_sym_us(8, 125_000), 2048);
        let n_x4 = n_symbols_x4(8, 125_000, 5, true, false, 12, 16, s_o, b_o);
        assert_eq!(n_x4, 197);
        assert_eq!(
            time_on_air_us(8, 125_000, 5, true, false, 12, 16, s_o, b_o),
            100_864
        );
    }

    #[test]
    fn scenario_2_sx126x_sf5() {
        let (s_o, b_o) = sx126x_symbol_offsets(5);
        assert_eq!((s_o, b_o), (2, -8));
        let n_x4 = n_symbols_x4(5, 500_000, 8, true, false, 12, 1, s_o, b_o);
        // bits = 8*1 + 16 - 4*5 + 8 + (-8) + 20 = 24, bps = 20, ceil(24/20) = 2,
        // symbols = 2*8 = 16, n_x4 = 17 + 4*(12+2+8+16) = 169.
        assert_eq!(n_x4, 169);
    }

    #[test]
    fn time_on_air_strictly_increasing_in_payload_len() {
        let (s_o, b_o) = sx127x_symbol_offsets();
        let mut prev = time_on_air_us(7, 125_000, 5, true, false, 8, 0, s_o, b_o);
        for len in 1..=200u8 {
            let cur = time_on_air_us(7, 125_000, 5, true, false, 8, len, s_o, b_o);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn sx126x_offsets_switch_at_sf7() {
        assert_eq!(sx126x_symbol_offsets(6), (2, -8));
        assert_eq!(sx126x_symbol_offsets(7), (0, 0));
    }
}
