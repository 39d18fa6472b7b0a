use crate::{IdError, IdResult};

const LONG_ID_LENGTH_WITH_CHECK_DIGIT: usize = 37;
const SHORT_ID_LENGTH_WITH_CHECK_DIGIT: usize = 20;

/// Calculate the check digit for a prescription identifier.
///
/// Hyphens are stripped first. Every character except the last contributes
/// its base-36 value weighted by a power of two, and the total is reduced
/// modulo 37: 36 encodes as `+`, 10 to 35 as `A` to `Z`, the rest as the
/// decimal digit.
///
/// The input must include the check-digit position: the final character is
/// excluded from the sum but counts towards the length, and the length sets
/// the weights.
pub fn calculate_check_digit(prescription_id: &str) -> IdResult<char> {
    let stripped: String = prescription_id.chars().filter(|c| *c != '-').collect();
    if stripped.len() < 2 {
        return Err(IdError::TooShort(prescription_id.to_owned()));
    }

    let len = stripped.len() as u32;
    let mut running_total: u64 = 0;
    for (position, character) in stripped.chars().enumerate() {
        if position as u32 == len - 1 {
            break;
        }
        let value = character
            .to_digit(36)
            .ok_or_else(|| IdError::InvalidCharacter {
                id: prescription_id.to_owned(),
                found: character,
            })? as u64;
        running_total += value << (len - position as u32 - 1);
    }

    let check_value = (38 - running_total % 37) % 37;
    Ok(match check_value {
        36 => '+',
        10..=35 => (b'A' + (check_value as u8 - 10)) as char,
        _ => char::from_digit(check_value as u32, 10).unwrap_or('0'),
    })
}

/// Check that the identifier's final character matches its check digit.
///
/// Mismatches are logged with the requesting internal id so bad ids can be
/// traced back to the message that carried them.
pub fn verify_check_digit(prescription_id: &str, internal_id: &str) -> IdResult<bool> {
    let check_character = match prescription_id.chars().last() {
        Some(c) => c,
        None => return Err(IdError::TooShort(prescription_id.to_owned())),
    };
    let check_value = calculate_check_digit(prescription_id)?;

    if check_value == check_character {
        return Ok(true);
    }

    tracing::warn!(
        internal_id,
        prescription_id,
        expected = %check_value,
        "MWS0042 prescription id failed checksum validation"
    );
    Ok(false)
}

/// Strip the check digit when the identifier's length says one is present.
pub fn remove_check_digit(prescription_id: &str) -> &str {
    match prescription_id.len() {
        LONG_ID_LENGTH_WITH_CHECK_DIGIT | SHORT_ID_LENGTH_WITH_CHECK_DIGIT => {
            &prescription_id[..prescription_id.len() - 1]
        }
        _ => prescription_id,
    }
}
