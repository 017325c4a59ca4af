use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::validation::{
    validate_document, validate_non_negative_amount, validate_phone, validate_positive_amount,
};

/// Point-of-sale transaction request
///
/// Field names follow the point-of-sale client contract.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PosTransactionRequest {
    pub org_id: Uuid,

    #[validate]
    pub client: PosClient,

    #[validate]
    pub sale: PosSale,

    /// Operator PIN
    #[validate(length(min = 1, message = "Operator identifier is required"))]
    pub operator_identifier: String,
}

/// Existing client by id, or a new client described by name and phone
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct PosClient {
    pub id: Option<Uuid>,

    #[serde(rename = "nome")]
    #[validate(length(min = 1, max = 255, message = "Client name must not be empty"))]
    pub name: Option<String>,

    #[serde(rename = "telefone")]
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,

    #[serde(rename = "cpfCnpj")]
    #[validate(custom = "validate_document")]
    pub document: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct PosSale {
    #[serde(rename = "valor")]
    #[validate(custom = "validate_positive_amount")]
    pub value: Decimal,

    /// Referral partner credited on this sale
    #[serde(rename = "parceiroId")]
    pub partner_id: Option<Uuid>,

    #[serde(default)]
    #[validate]
    pub cashback: PosCashback,
}

/// Cashback the client wants to redeem on this sale
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct PosCashback {
    #[serde(rename = "aplicar")]
    pub apply: bool,

    #[serde(rename = "valor")]
    #[validate(custom = "validate_non_negative_amount")]
    pub value: Decimal,
}

impl PosCashback {
    pub fn requested(&self) -> Option<Decimal> {
        (self.apply && self.value > Decimal::ZERO).then_some(self.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PosTransactionResponse {
    pub message: String,
    pub client_id: Uuid,
    /// `None` when an external integration owns the organization's sales
    pub sale_id: Option<Uuid>,
    /// Cashback credited to the client by this sale
    pub client_accumulated_cashback_value: Decimal,
    pub client_new_overall_available_balance: Decimal,
    pub visual_client_accumulated_cashback_value: String,
    pub visual_client_new_overall_available_balance: String,
}

/// Format an amount as Brazilian reais, e.g. `R$ 1.234,56`
pub fn format_brl(amount: Decimal) -> String {
    let rounded = crate::cashback::round_amount(amount);
    let plain = format!("{:.2}", rounded.abs());
    let (integer, fraction) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{}R$ {},{}", sign, grouped, fraction)
}
