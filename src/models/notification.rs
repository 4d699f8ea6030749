use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One monitored class of change in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    LeaveDecision,
    LeavePendingApproval,
    SecondApproval,
    AllocationPending,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::LeaveDecision,
        Category::LeavePendingApproval,
        Category::SecondApproval,
        Category::AllocationPending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::LeaveDecision => "leave_decision",
            Category::LeavePendingApproval => "leave_pending_approval",
            Category::SecondApproval => "second_approval",
            Category::AllocationPending => "allocation_pending",
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            Category::AllocationPending => "hr.leave.allocation",
            _ => "hr.leave",
        }
    }

    /// States that put a record in scope for this category.
    pub fn states(&self) -> &'static [&'static str] {
        match self {
            Category::LeaveDecision => &["validate", "refuse"],
            Category::LeavePendingApproval => &["confirm"],
            Category::SecondApproval => &["validate1"],
            Category::AllocationPending => &["confirm"],
        }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Category::AllocationPending => &[
                "id",
                "name",
                "state",
                "employee_id",
                "holiday_status_id",
                "number_of_days",
                "write_date",
            ],
            _ => &[
                "id",
                "name",
                "state",
                "employee_id",
                "holiday_status_id",
                "date_from",
                "date_to",
                "number_of_days",
                "write_date",
            ],
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title, body and data of a push message, independent of any recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedNotification {
    pub recipients: BTreeSet<String>,
    pub content: NotificationContent,
}

/// A single delivery attempt handed to the push gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(token: &str, content: &NotificationContent) -> Self {
        Self {
            token: token.to_string(),
            title: content.title.clone(),
            body: content.body.clone(),
            data: content.data.clone(),
        }
    }
}
