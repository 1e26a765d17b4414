//! Payment gateway data models.

use super::errors::{PaymentError, PaymentResult};
use crate::{
    ledger::{EntryDirection, Transaction, TransactionStatus, TransactionType},
    users::UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// NOWPayments `payment_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Expired,
    Refunded,
}

impl GatewayStatus {
    /// Ledger status this gateway status settles to
    pub fn transaction_status(self) -> TransactionStatus {
        match self {
            GatewayStatus::Waiting
            | GatewayStatus::Confirming
            | GatewayStatus::Confirmed
            | GatewayStatus::Sending
            | GatewayStatus::PartiallyPaid => TransactionStatus::Pending,
            GatewayStatus::Finished => TransactionStatus::Completed,
            GatewayStatus::Failed | GatewayStatus::Expired => TransactionStatus::Failed,
            GatewayStatus::Refunded => TransactionStatus::Cancelled,
        }
    }
}

impl FromStr for GatewayStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(GatewayStatus::Waiting),
            "confirming" => Ok(GatewayStatus::Confirming),
            "confirmed" => Ok(GatewayStatus::Confirmed),
            "sending" => Ok(GatewayStatus::Sending),
            "partially_paid" => Ok(GatewayStatus::PartiallyPaid),
            "finished" => Ok(GatewayStatus::Finished),
            "failed" => Ok(GatewayStatus::Failed),
            "expired" => Ok(GatewayStatus::Expired),
            "refunded" => Ok(GatewayStatus::Refunded),
            other => Err(PaymentError::UnknownStatus(other.to_string())),
        }
    }
}

/// Direction of money through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Deposit,
    Withdrawal,
}

impl PaymentKind {
    pub fn transaction_type(self) -> TransactionType {
        match self {
            PaymentKind::Deposit => TransactionType::Deposit,
            PaymentKind::Withdrawal => TransactionType::Withdrawal,
        }
    }

    pub fn direction(self) -> EntryDirection {
        match self {
            PaymentKind::Deposit => EntryDirection::Credit,
            PaymentKind::Withdrawal => EntryDirection::Debit,
        }
    }
}

/// One gateway status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: String,
    pub user_id: UserId,
    pub kind: PaymentKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: GatewayStatus,
}

/// What recording an event did
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// Recorded or still pending; no balance change yet
    Pending(Transaction),
    /// This event moved the transaction to a terminal status
    Settled(Transaction),
    /// Transaction was already terminal; replay ignored
    AlreadySettled(Transaction),
}

impl PaymentOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            PaymentOutcome::Pending(tx)
            | PaymentOutcome::Settled(tx)
            | PaymentOutcome::AlreadySettled(tx) => tx,
        }
    }
}

/// IPN callback body (the fields we use)
#[derive(Debug, Clone, Deserialize)]
pub struct IpnPayload {
    pub payment_id: Value,
    pub payment_status: String,
    pub price_amount: Decimal,
    pub price_currency: String,
    /// `deposit-<user id>` or `withdrawal-<user id>`
    pub order_id: String,
}

impl IpnPayload {
    pub fn into_event(self) -> PaymentResult<PaymentEvent> {
        let payment_id = match &self.payment_id {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(PaymentError::InvalidPayload(format!(
                    "bad payment_id {other}"
                )));
            }
        };

        let (kind, user_id) = parse_order_id(&self.order_id)?;
        Ok(PaymentEvent {
            payment_id,
            user_id,
            kind,
            amount: self.price_amount,
            currency: self.price_currency.to_ascii_uppercase(),
            status: self.payment_status.parse()?,
        })
    }
}

/// Order ids the payment page is created with
pub fn order_id(kind: PaymentKind, user_id: UserId) -> String {
    match kind {
        PaymentKind::Deposit => format!("deposit-{user_id}"),
        PaymentKind::Withdrawal => format!("withdrawal-{user_id}"),
    }
}

fn parse_order_id(order_id: &str) -> PaymentResult<(PaymentKind, UserId)> {
    let invalid = || PaymentError::InvalidPayload(format!("bad order_id {order_id}"));
    let (kind, user) = order_id.split_once('-').ok_or_else(invalid)?;
    let kind = match kind {
        "deposit" => PaymentKind::Deposit,
        "withdrawal" => PaymentKind::Withdrawal,
        _ => return Err(invalid()),
    };
    let user_id = user.parse::<UserId>().map_err(|_| invalid())?;
    Ok((kind, user_id))
}
