use serde::{Deserialize, Serialize};

use crate::db_types::{MatchStatus, ObligationFamily, PaymentRecord, Satang};

/// The fields the slip reader extracted from a transfer slip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlipData {
    /// The transferred amount. Accepts `"1,500.50"` or `1500.5` in JSON.
    #[serde(with = "spe_common::decimal")]
    pub amount: Satang,
    pub bank: Option<String>,
    /// The transfer date as printed on the slip
    pub date: Option<String>,
    /// The bank's transaction reference, if the slip reader found one
    #[serde(rename = "ref", alias = "reference")]
    pub reference: Option<String>,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
}

impl SlipData {
    pub fn new(amount: Satang) -> Self {
        Self { amount, ..Default::default() }
    }

    pub fn with_reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_sender<S: Into<String>>(mut self, sender: S) -> Self {
        self.sender_name = Some(sender.into());
        self
    }

    pub fn with_bank<S: Into<String>>(mut self, bank: S) -> Self {
        self.bank = Some(bank.into());
        self
    }
}

/// Where the slip came from: which shop, which chat platform and which of its users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelContext {
    pub platform: String,
    pub external_user_id: String,
    pub tenant_id: String,
    pub channel_id: Option<i64>,
    pub display_name: Option<String>,
}

impl ChannelContext {
    pub fn new<S: Into<String>>(tenant_id: S, platform: S, external_user_id: S) -> Self {
        Self {
            platform: platform.into(),
            external_user_id: external_user_id.into(),
            tenant_id: tenant_id.into(),
            channel_id: None,
            display_name: None,
        }
    }

    pub fn with_display_name<S: Into<String>>(mut self, name: S) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_channel_id(mut self, channel_id: i64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }
}

/// The answer handed back to the transport layer for every processed slip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// False only for duplicates. Unmatched payments are still recorded successfully.
    pub success: bool,
    pub matched_type: Option<ObligationFamily>,
    pub matched_id: Option<i64>,
    pub confidence: u8,
    pub match_status: MatchStatus,
    pub payment_record_id: i64,
}

impl MatchResult {
    pub fn from_record(record: &PaymentRecord) -> Self {
        let obligation = record.obligation();
        Self {
            success: true,
            matched_type: obligation.map(|o| o.family),
            matched_id: obligation.map(|o| o.id),
            confidence: record.confidence,
            match_status: record.match_status,
            payment_record_id: record.id,
        }
    }

    /// The reply for a slip that was already recorded. Points at the existing record.
    pub fn duplicate_of(existing: &PaymentRecord) -> Self {
        Self {
            success: false,
            matched_type: None,
            matched_id: None,
            confidence: 0,
            match_status: MatchStatus::Duplicate,
            payment_record_id: existing.id,
        }
    }
}

/// Counts from one pass over the pending payment queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchSummary {
    pub examined: usize,
    pub allocated: usize,
    pub sent_to_review: usize,
    pub still_unmatched: usize,
    pub failed: usize,
}
