//! Stripe webhook 事件到计费事件的映射
//!
//! 只识别与佣金/权益相关的几类事件，其余一律归为 `Unhandled`，
//! 不会因为未知事件类型报错。

use crate::entities::PlanTier;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

/// 一次性购买完成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCompleted {
    pub event_id: String,
    pub user_id: i64,
    /// 美分
    pub amount: i64,
    pub payment_ref: String,
    pub report_credits: i64,
}

/// 订阅账单已支付
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePaid {
    pub event_id: String,
    pub customer_id: Option<String>,
    pub user_id: Option<i64>,
    /// 美分
    pub amount: i64,
    pub invoice_ref: String,
    pub invoice_date: DateTime<Utc>,
    pub plan_tier: Option<PlanTier>,
    pub period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    PurchaseCompleted(PurchaseCompleted),
    SubscriptionStarted { user_id: i64, customer_id: String },
    InvoicePaid(InvoicePaid),
    Unhandled { event_type: String },
}

type Metadata = HashMap<String, String>;

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    mode: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    client_reference_id: Option<String>,
    customer: Option<Value>,
    payment_intent: Option<Value>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    customer: Option<Value>,
    amount_paid: Option<i64>,
    created: Option<i64>,
    status_transitions: Option<InvoiceStatusTransitions>,
    metadata: Option<Metadata>,
    subscription_details: Option<SubscriptionDetails>,
    lines: Option<InvoiceLines>,
}

#[derive(Debug, Deserialize)]
struct InvoiceStatusTransitions {
    paid_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionDetails {
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    period: Option<InvoiceLinePeriod>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLinePeriod {
    end: Option<i64>,
}

impl BillingEvent {
    pub fn parse(payload: &str) -> AppResult<Self> {
        let event: WebhookEvent = serde_json::from_str(payload)?;
        Self::from_webhook(event)
    }

    pub fn from_webhook(event: WebhookEvent) -> AppResult<Self> {
        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session: CheckoutSessionObject = serde_json::from_value(event.data.object)?;
                Self::from_checkout_session(event.id, event.event_type, session)
            }
            "invoice.paid" => {
                let invoice: InvoiceObject = serde_json::from_value(event.data.object)?;
                Self::from_invoice(event.id, invoice)
            }
            _ => Ok(BillingEvent::Unhandled {
                event_type: event.event_type,
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            BillingEvent::PurchaseCompleted(_) => "purchase_completed",
            BillingEvent::SubscriptionStarted { .. } => "subscription_started",
            BillingEvent::InvoicePaid(_) => "invoice_paid",
            BillingEvent::Unhandled { event_type } => event_type,
        }
    }

    fn from_checkout_session(
        event_id: String,
        event_type: String,
        session: CheckoutSessionObject,
    ) -> AppResult<Self> {
        let user_id = session
            .client_reference_id
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .or_else(|| metadata_i64(session.metadata.as_ref(), "user_id"));

        match session.mode.as_deref() {
            Some("payment") => {
                // 异步支付方式要等 async_payment_succeeded
                if session.payment_status.as_deref() != Some("paid") {
                    return Ok(BillingEvent::Unhandled { event_type });
                }
                let user_id = user_id.ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "Checkout session {} has no user reference",
                        session.id
                    ))
                })?;
                let amount = session.amount_total.ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "Checkout session {} has no amount_total",
                        session.id
                    ))
                })?;
                let payment_ref = session
                    .payment_intent
                    .as_ref()
                    .and_then(expandable_id)
                    .unwrap_or_else(|| session.id.clone());
                Ok(BillingEvent::PurchaseCompleted(PurchaseCompleted {
                    event_id,
                    user_id,
                    amount,
                    payment_ref,
                    report_credits: metadata_i64(session.metadata.as_ref(), "report_credits")
                        .unwrap_or(0),
                }))
            }
            Some("subscription") => {
                let user_id = user_id.ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "Checkout session {} has no user reference",
                        session.id
                    ))
                })?;
                let customer_id = session
                    .customer
                    .as_ref()
                    .and_then(expandable_id)
                    .ok_or_else(|| {
                        AppError::ValidationError(format!(
                            "Checkout session {} has no customer",
                            session.id
                        ))
                    })?;
                Ok(BillingEvent::SubscriptionStarted {
                    user_id,
                    customer_id,
                })
            }
            _ => Ok(BillingEvent::Unhandled { event_type }),
        }
    }

    fn from_invoice(event_id: String, invoice: InvoiceObject) -> AppResult<Self> {
        let sub_meta = invoice
            .subscription_details
            .as_ref()
            .and_then(|d| d.metadata.as_ref());
        let first_line = invoice.lines.as_ref().and_then(|l| l.data.first());
        let line_meta = first_line.and_then(|l| l.metadata.as_ref());

        let invoice_ts = invoice
            .status_transitions
            .as_ref()
            .and_then(|s| s.paid_at)
            .or(invoice.created)
            .ok_or_else(|| {
                AppError::ValidationError(format!("Invoice {} has no date", invoice.id))
            })?;
        let invoice_date = timestamp(invoice_ts).ok_or_else(|| {
            AppError::ValidationError(format!("Invoice {} has an invalid date", invoice.id))
        })?;

        let plan_tier = [sub_meta, invoice.metadata.as_ref(), line_meta]
            .into_iter()
            .flatten()
            .find_map(|m| m.get("plan"))
            .and_then(|p| p.parse::<PlanTier>().ok());

        Ok(BillingEvent::InvoicePaid(InvoicePaid {
            event_id,
            customer_id: invoice.customer.as_ref().and_then(expandable_id),
            user_id: metadata_i64(sub_meta, "user_id")
                .or_else(|| metadata_i64(invoice.metadata.as_ref(), "user_id")),
            amount: invoice.amount_paid.unwrap_or(0),
            invoice_ref: invoice.id,
            invoice_date,
            plan_tier,
            period_end: first_line
                .and_then(|l| l.period.as_ref())
                .and_then(|p| p.end)
                .and_then(timestamp),
        }))
    }
}

/// Stripe 可展开字段：字符串 id 或带 id 的对象
fn expandable_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn metadata_i64(metadata: Option<&Metadata>, key: &str) -> Option<i64> {
    metadata
        .and_then(|m| m.get(key))
        .and_then(|v| v.trim().parse::<i64>().ok())
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
