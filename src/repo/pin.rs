use rand::RngExt;

use crate::protocol::PIN_LENGTH;

/// Sample a 6-digit display PIN, skipping patterns that are disallowed
/// because they are trivially guessable or look like placeholders.
pub fn generate_pin() -> String {
    let mut rng = rand::rng();
    loop {
        let pin: String = (0..PIN_LENGTH)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect();
        if !is_disallowed(&pin) {
            return pin;
        }
    }
}

/// A PIN is disallowed when every digit is the same (`000000`, `777777`)
/// or the digits form a consecutive ascending or descending run
/// (`123456`, `654321`).
pub fn is_disallowed(pin: &str) -> bool {
    let digits: Vec<u8> = pin.bytes().map(|b| b.wrapping_sub(b'0')).collect();
    if digits.len() != PIN_LENGTH || digits.iter().any(|d| *d > 9) {
        return true;
    }

    let all_same = digits.windows(2).all(|w| w[0] == w[1]);
    let ascending = digits.windows(2).all(|w| w[1] == w[0].wrapping_add(1));
    let descending = digits.windows(2).all(|w| w[0] == w[1].wrapping_add(1));
    all_same || ascending || descending
}
