use crate::error::{FieldErrors, PlatformError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Mpesa,
    Binance,
}

impl PaymentMethod {
    /// Form/wire field that carries the payer identifier for this provider.
    pub fn payer_field(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "phoneNumber",
            PaymentMethod::Binance => "binancePayId",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Mpesa => f.write_str("Mpesa"),
            PaymentMethod::Binance => f.write_str("Binance"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mpesa" | "m-pesa" => Ok(PaymentMethod::Mpesa),
            "binance" => Ok(PaymentMethod::Binance),
            "" => Err(PlatformError::invalid(
                "paymentMethod",
                "Payment method is required",
            )),
            other => Err(PlatformError::invalid(
                "paymentMethod",
                format!("Unsupported payment method '{other}'"),
            )),
        }
    }
}

/// Status reported by the payment-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Lenient parse of the status string; anything unrecognised stays pending.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "canceled" | "cancelled" => PaymentStatus::Canceled,
            _ => PaymentStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Checks the M-Pesa phone shape: optional leading `+`, then 10 to 12 digits.
pub fn is_valid_phone_number(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    (10..=12).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A validated request to start a payment with one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub payer_identifier: String,
    pub amount: Decimal,
    pub plan_id: u64,
    pub email: String,
}

impl PaymentRequest {
    pub fn new(
        method: PaymentMethod,
        payer_identifier: impl Into<String>,
        amount: Decimal,
        plan_id: u64,
        email: impl Into<String>,
    ) -> Result<Self> {
        let payer_identifier: String = payer_identifier.into();
        let request = Self {
            method,
            payer_identifier: payer_identifier.trim().to_string(),
            amount,
            plan_id,
            email: email.into(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        let field = self.method.payer_field();
        match self.method {
            PaymentMethod::Mpesa if !is_valid_phone_number(&self.payer_identifier) => {
                errors.insert(
                    field,
                    "Enter a valid phone number (10-12 digits, optional leading +)",
                );
            }
            PaymentMethod::Binance if self.payer_identifier.is_empty() => {
                errors.insert(field, "Binance Pay ID is required");
            }
            _ => {}
        }
        if self.amount <= Decimal::ZERO {
            errors.insert("amount", "Amount must be positive");
        }
        errors.into_result()
    }

    pub fn mpesa_body(&self) -> MpesaInitiation {
        MpesaInitiation {
            phone_number: self.payer_identifier.clone(),
            amount: self.amount,
            plan_id: self.plan_id,
            email: self.email.clone(),
        }
    }

    pub fn binance_body(&self) -> BinanceInitiation {
        BinanceInitiation {
            amount: self.amount,
            binance_pay_id: self.payer_identifier.clone(),
            plan_id: self.plan_id,
            email: self.email.clone(),
        }
    }
}

/// Serialises whole amounts as JSON integers and the rest as floats.
fn serialize_amount<S>(amount: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if amount.fract().is_zero()
        && let Some(whole) = amount.to_i64()
    {
        return serializer.serialize_i64(whole);
    }
    match amount.to_f64() {
        Some(value) => serializer.serialize_f64(value),
        None => Err(serde::ser::Error::custom("amount out of range")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MpesaInitiation {
    pub phone_number: String,
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Decimal,
    pub plan_id: u64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceInitiation {
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Decimal,
    pub binance_pay_id: String,
    pub plan_id: u64,
    pub email: String,
}

/// Provider response to an initiation call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub checkout_url: Option<String>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

impl InitiationResponse {
    /// Turns a provider answer into a fresh pending session.
    pub fn into_session(self) -> Result<PaymentSession> {
        match (self.success, self.payment_id) {
            (true, Some(payment_id)) if !payment_id.is_empty() => Ok(PaymentSession {
                payment_id,
                status: PaymentStatus::Pending,
                qr_code_url: self.qr_code_url,
                checkout_url: self.checkout_url,
            }),
            _ => Err(PlatformError::Provider(
                self.message
                    .unwrap_or_else(|| "Payment initiation was not accepted".to_string()),
            )),
        }
    }
}

/// Server-tracked record of one payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub qr_code_url: Option<String>,
    pub checkout_url: Option<String>,
}

impl PaymentSession {
    /// Records a polled status.
    ///
    /// Returns `true` when the status changed. A terminal session never
    /// changes again.
    pub fn apply(&mut self, status: PaymentStatus) -> bool {
        if self.status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
