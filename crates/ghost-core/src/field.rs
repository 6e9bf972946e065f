//! Arithmetic in GF(2⁸)
//!
//! Bytes are treated as polynomials over GF(2) reduced modulo the AES
//! polynomial x⁸ + x⁴ + x³ + x + 1 (0x11B). Addition and subtraction are both
//! XOR. Multiplication always runs eight masked iterations and inversion is a
//! fixed square-and-multiply chain, so neither depends on a lookup table nor
//! branches on its operands.

/// Low byte of the reduction polynomial (the x⁸ term is implied by the shift)
pub const REDUCTION: u8 = 0x1B;

/// Field addition (XOR)
#[inline]
pub const fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field subtraction, identical to addition in characteristic 2
#[inline]
pub const fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Carry-less multiply-and-reduce
pub const fn multiply(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    let mut i = 0;
    while i < 8 {
        // 0xFF when the low bit of b is set, 0x00 otherwise
        product ^= a & (b & 1).wrapping_neg();
        let carry = (a >> 7).wrapping_neg();
        a = (a << 1) ^ (REDUCTION & carry);
        b >>= 1;
        i += 1;
    }
    product
}

/// Multiplicative inverse, computed as a²⁵⁴
///
/// 254 = 0b1111_1110, so seven squarings of `a` accumulated into the result
/// give a^(2 + 4 + ... + 128). Zero maps to zero; callers must never rely on
/// that as a real inverse.
pub const fn inverse(a: u8) -> u8 {
    let mut result = 1u8;
    let mut power = a;
    let mut i = 0;
    while i < 7 {
        power = multiply(power, power);
        result = multiply(result, power);
        i += 1;
    }
    result
}

/// Evaluate a polynomial at `x` using Horner's rule
///
/// Coefficients are in increasing degree order, so `coefficients[0]` is the
/// constant term.
pub fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| add(multiply(acc, x), c))
}
