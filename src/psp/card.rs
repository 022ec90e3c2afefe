//! Pure card and document validation. No network calls here; the checkout
//! client uses these before anything is sent to the gateway.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Card brands accepted by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Elo,
    Hipercard,
}

fn digits_of(input: &str) -> Option<Vec<u8>> {
    let mut digits = Vec::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c as u8 - b'0');
        } else if c == ' ' || c == '.' || c == '-' {
            // Common formatting separators are tolerated
        } else {
            return None;
        }
    }
    Some(digits)
}

/// Luhn check over a card number. Separators (space, dot, dash) are
/// stripped; any other non-digit fails the check.
pub fn luhn_valid(number: &str) -> bool {
    let digits = match digits_of(number) {
        Some(d) if (12..=19).contains(&d.len()) => d,
        _ => return false,
    };

    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut v = u32::from(*d);
        if i % 2 == 1 {
            v *= 2;
            if v > 9 {
                v -= 9;
            }
        }
        sum += v;
    }
    sum % 10 == 0
}

/// Leading-digit prefixes per brand. Elo and Hipercard are matched before
/// Visa and Mastercard: their ranges overlap the generic prefixes.
const HIPERCARD_PREFIXES: &[&str] = &["606282", "3841"];
const ELO_PREFIXES: &[&str] = &[
    "401178", "401179", "431274", "438935", "451416", "457393", "457631", "457632", "504175",
    "506699", "5067", "509", "627780", "636297", "636368", "650", "6516", "6550",
];
const AMEX_PREFIXES: &[&str] = &["34", "37"];

fn normalized(number: &str) -> Option<String> {
    let digits = digits_of(number)?;
    if digits.len() < 12 {
        return None;
    }
    Some(digits.iter().map(|d| (d + b'0') as char).collect())
}

/// Detect the card brand from the leading digits. Returns `None` for
/// unrecognized prefixes; the gateway will not accept those cards.
pub fn detect_brand(number: &str) -> Option<CardBrand> {
    let number = normalized(number)?;

    if HIPERCARD_PREFIXES.iter().any(|p| number.starts_with(p)) {
        return Some(CardBrand::Hipercard);
    }
    if ELO_PREFIXES.iter().any(|p| number.starts_with(p)) {
        return Some(CardBrand::Elo);
    }
    if AMEX_PREFIXES.iter().any(|p| number.starts_with(p)) {
        return Some(CardBrand::Amex);
    }
    if let Some(head) = number.get(0..2).and_then(|s| s.parse::<u32>().ok()) {
        if (51..=55).contains(&head) {
            return Some(CardBrand::Mastercard);
        }
    }
    if let Some(head) = number.get(0..4).and_then(|s| s.parse::<u32>().ok()) {
        if (2221..=2720).contains(&head) {
            return Some(CardBrand::Mastercard);
        }
    }
    if number.starts_with('4') {
        return Some(CardBrand::Visa);
    }
    None
}

/// CPF check-digit validation: two-pass mod-11 over the first 9 then 10
/// digits. All-equal-digit strings are rejected regardless of check digits.
pub fn cpf_valid(cpf: &str) -> bool {
    let digits: Vec<u8> = cpf.chars().filter_map(|c| c.to_digit(10).map(|d| d as u8)).collect();
    if digits.len() != 11 {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u8 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| u32::from(*d) * (len as u32 + 1 - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 {
            0
        } else {
            rem as u8
        }
    };

    check(9) == digits[9] && check(10) == digits[10]
}
