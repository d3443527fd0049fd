pub const COLORS: [&str; 10] = [
    "#FF5733", "#33FF57", "#3357FF", "#F033FF", "#FF33A8", "#33FFF5", "#FF8C33", "#8C33FF",
    "#FF3333", "#33FF99",
];

/// Deterministic palette color for an identity key.
///
/// Polynomial hash (`h = c + 31h`, 32-bit wrapping) over UTF-16 code units.
/// Different keys may share a color.
pub fn color_for(key: &str) -> &'static str {
    let hash = key
        .encode_utf16()
        .fold(0i32, |hash, unit| (unit as i32).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash)));
    let index = (hash as i64).unsigned_abs() % COLORS.len() as u64;
    COLORS[index as usize]
}
