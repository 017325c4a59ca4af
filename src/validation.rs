// Validation utilities module
// Custom validator functions for point-of-sale requests

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::models::normalize_phone;

/// Validates that a phone has 10 or 11 national digits once normalized
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    match normalize_phone(phone).len() {
        10 | 11 => Ok(()),
        _ => Err(ValidationError::new("invalid_phone")),
    }
}

/// Validates that a CPF (11 digits) or CNPJ (14 digits) has the right length
pub fn validate_document(document: &str) -> Result<(), ValidationError> {
    let digits = document.chars().filter(|c| c.is_ascii_digit()).count();
    if digits == 11 || digits == 14 {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_document"))
    }
}

/// Validates that an amount is strictly positive
pub fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        Err(ValidationError::new("amount_must_be_positive"))
    } else {
        Ok(())
    }
}

/// Validates that an amount is zero or positive
pub fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        Err(ValidationError::new("amount_must_not_be_negative"))
    } else {
        Ok(())
    }
}
