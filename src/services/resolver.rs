use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::device::Role;
use crate::models::notification::Category;
use crate::models::record::{ChangeRecord, EmployeeLink, GroupName, LeaveType, UserGroups};
use crate::services::odoo::{fetch, timed, RecordStore, SearchQuery, Session};
use crate::services::registry::DeviceRegistry;

// Keyword sets used to read a leave type's approval policy and a user's
// group names. Matched case-insensitively on whole words.
pub const OFFICER_KEYWORDS: &[&str] = &["hr", "rh", "officer", "time off officer", "gestionnaire"];
pub const MANAGER_KEYWORDS: &[&str] = &[
    "manager",
    "team leader",
    "supervisor",
    "chef",
    "hierarchique",
    "hiérarchique",
];
pub const DUAL_KEYWORDS: &[&str] = &["both", "dual", "double", "two step", "les deux"];
pub const VALIDATOR_KEYWORDS: &[&str] = &["validator", "approver", "administrator"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    OfficerOnly,
    ManagerStage,
    DualStage,
    Unknown,
}

/// Lowercases, turns punctuation into spaces and pads with spaces so that
/// keywords can be matched on word boundaries.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    format!(" {} ", words.join(" "))
}

pub fn matches_any(text: &str, keywords: &[&str]) -> bool {
    let haystack = normalize(text);
    keywords.iter().any(|kw| haystack.contains(&normalize(kw)))
}

/// Reads the approval policy from the type's validation field and display
/// name. Dual wins over manager, manager over officer.
pub fn classify_validation(validation_type: &str, display_name: &str) -> ValidationPolicy {
    let text = format!("{} {}", validation_type, display_name);
    if matches_any(&text, DUAL_KEYWORDS) {
        ValidationPolicy::DualStage
    } else if matches_any(&text, MANAGER_KEYWORDS) {
        ValidationPolicy::ManagerStage
    } else if matches_any(&text, OFFICER_KEYWORDS) {
        ValidationPolicy::OfficerOnly
    } else {
        ValidationPolicy::Unknown
    }
}

pub fn classify_role<S: AsRef<str>>(group_names: &[S]) -> Role {
    let names: Vec<&str> = group_names.iter().map(AsRef::as_ref).collect();
    if names.iter().any(|n| matches_any(n, MANAGER_KEYWORDS)) {
        Role::Manager
    } else if names
        .iter()
        .any(|n| matches_any(n, OFFICER_KEYWORDS) || matches_any(n, VALIDATOR_KEYWORDS))
    {
        Role::Validator
    } else {
        Role::Employee
    }
}

/// Which routing branch produced the recipient set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Subject,
    Officers,
    Manager,
    PrivilegedBroadcast,
    Unroutable,
}

#[derive(Debug, Clone)]
pub struct Recipients {
    pub route: Route,
    pub tokens: BTreeSet<String>,
}

impl Recipients {
    fn new(route: Route, tokens: Vec<String>) -> Self {
        Self {
            route,
            tokens: tokens.into_iter().collect(),
        }
    }

    fn unroutable() -> Self {
        Self::new(Route::Unroutable, Vec::new())
    }
}

#[derive(Clone)]
pub struct RecipientResolver {
    store: Arc<dyn RecordStore>,
    registry: DeviceRegistry,
    officer_user_ids: Vec<i64>,
    timeout: Duration,
}

impl RecipientResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: DeviceRegistry,
        officer_user_ids: Vec<i64>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            officer_user_ids,
            timeout,
        }
    }

    pub async fn resolve(
        &self,
        session: &Session,
        category: Category,
        record: &ChangeRecord,
    ) -> Result<Recipients, StoreError> {
        match category {
            Category::LeaveDecision => self.resolve_subject(session, record).await,
            Category::LeavePendingApproval => self.resolve_approver(session, record).await,
            Category::SecondApproval | Category::AllocationPending => {
                Ok(Recipients::new(Route::Officers, self.officer_tokens().await))
            }
        }
    }

    async fn resolve_subject(&self, session: &Session, record: &ChangeRecord) -> Result<Recipients, StoreError> {
        let Some(employee) = &record.employee_id else {
            return Ok(Recipients::unroutable());
        };
        let tokens = self.employee_tokens(session, employee.id).await?;
        if tokens.is_empty() {
            return Ok(Recipients::unroutable());
        }
        Ok(Recipients::new(Route::Subject, tokens))
    }

    async fn resolve_approver(&self, session: &Session, record: &ChangeRecord) -> Result<Recipients, StoreError> {
        let Some(employee) = &record.employee_id else {
            return Ok(Recipients::unroutable());
        };

        let policy = match &record.holiday_status_id {
            Some(leave_type) => self.leave_type_policy(session, leave_type.id, &leave_type.name).await?,
            None => ValidationPolicy::Unknown,
        };
        log::debug!("Leave {} uses validation policy {:?}", record.id, policy);

        // Officer-only types never fall through to the manager or the
        // privileged broadcast.
        if policy == ValidationPolicy::OfficerOnly {
            let tokens = self.officer_tokens().await;
            if tokens.is_empty() {
                log::warn!("No officer device registered for officer-only leave {}", record.id);
                return Ok(Recipients::unroutable());
            }
            return Ok(Recipients::new(Route::Officers, tokens));
        }

        let manager = self
            .employee_link(session, employee.id)
            .await?
            .and_then(|link| link.parent_id);

        if let Some(manager) = manager {
            let tokens = self.employee_tokens(session, manager.id).await?;
            if !tokens.is_empty() {
                return Ok(Recipients::new(Route::Manager, tokens));
            }
            log::info!("Manager {} of employee {} has no registered device", manager.id, employee.id);
        }

        Ok(self.privileged_broadcast().await)
    }

    async fn leave_type_policy(
        &self,
        session: &Session,
        type_id: i64,
        fallback_name: &str,
    ) -> Result<ValidationPolicy, StoreError> {
        let query = SearchQuery::new("hr.leave.type")
            .filter(json!(["id", "=", type_id]))
            .fields(&["id", "name", "leave_validation_type"])
            .limit(1);
        let types: Vec<LeaveType> = timed(self.timeout, fetch(self.store.as_ref(), session, &query)).await?;

        Ok(match types.first() {
            Some(t) => classify_validation(
                t.leave_validation_type.as_deref().unwrap_or_default(),
                t.name.as_deref().unwrap_or(fallback_name),
            ),
            None => classify_validation("", fallback_name),
        })
    }

    async fn employee_link(&self, session: &Session, employee_id: i64) -> Result<Option<EmployeeLink>, StoreError> {
        let query = SearchQuery::new("hr.employee")
            .filter(json!(["id", "=", employee_id]))
            .fields(&["id", "user_id", "parent_id"])
            .limit(1);
        let links: Vec<EmployeeLink> = timed(self.timeout, fetch(self.store.as_ref(), session, &query)).await?;
        Ok(links.into_iter().next())
    }

    /// Tokens registered under the employee's linked user account, falling
    /// back to tokens registered under the raw employee id.
    async fn employee_tokens(&self, session: &Session, employee_id: i64) -> Result<Vec<String>, StoreError> {
        let user_id = self
            .employee_link(session, employee_id)
            .await?
            .and_then(|link| link.user_id);

        if let Some(user) = user_id {
            let tokens = self.registry.tokens_for(&user.id.to_string()).await;
            if !tokens.is_empty() {
                return Ok(tokens);
            }
        }
        Ok(self.registry.tokens_for(&employee_id.to_string()).await)
    }

    async fn officer_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        for officer in &self.officer_user_ids {
            tokens.extend(self.registry.tokens_for(&officer.to_string()).await);
        }
        tokens
    }

    async fn privileged_broadcast(&self) -> Recipients {
        let tokens = self.registry.tokens_with_role(|role| role.is_privileged()).await;
        Recipients::new(Route::PrivilegedBroadcast, tokens)
    }
}

/// Two-step group lookup used by the role endpoint: the user's group ids,
/// then the group names, classified with the routing keywords.
pub async fn lookup_user_role(
    store: &dyn RecordStore,
    timeout: Duration,
    user_id: i64,
) -> Result<(Role, Vec<String>), StoreError> {
    let session = timed(timeout, store.authenticate()).await?;

    let users_query = SearchQuery::new("res.users")
        .filter(json!(["id", "=", user_id]))
        .fields(&["id", "groups_id"])
        .limit(1);
    let users: Vec<UserGroups> = timed(timeout, fetch(store, &session, &users_query)).await?;
    let group_ids = users.into_iter().next().map(|u| u.groups_id).unwrap_or_default();
    if group_ids.is_empty() {
        return Ok((Role::Employee, Vec::new()));
    }

    let groups_query = SearchQuery::new("res.groups")
        .filter(json!(["id", "in", group_ids]))
        .fields(&["id", "name", "full_name"]);
    let groups: Vec<GroupName> = timed(timeout, fetch(store, &session, &groups_query)).await?;

    let names: Vec<String> = groups
        .into_iter()
        .filter_map(|g| g.full_name.or(g.name))
        .collect();
    Ok((classify_role(&names), names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStore;
    use serde_json::Value;

    #[test]
    fn test_classify_validation_table() {
        assert_eq!(classify_validation("hr", "Paid Time Off"), ValidationPolicy::OfficerOnly);
        assert_eq!(classify_validation("manager", "Sick"), ValidationPolicy::ManagerStage);
        assert_eq!(classify_validation("both", "Unpaid"), ValidationPolicy::DualStage);
        assert_eq!(classify_validation("", "Compensatory days"), ValidationPolicy::Unknown);
    }

    #[test]
    fn test_dual_takes_precedence_over_officer() {
        assert_eq!(
            classify_validation("hr", "Officer and manager, both required"),
            ValidationPolicy::DualStage
        );
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert!(!matches_any("Chrome extension days", OFFICER_KEYWORDS));
        assert!(matches_any("By Employee's Manager", MANAGER_KEYWORDS));
        assert!(matches_any("Time Off / Officer", OFFICER_KEYWORDS));
    }

    #[test]
    fn test_classify_role_from_group_names() {
        assert_eq!(classify_role(&["Time Off / Officer"]), Role::Validator);
        assert_eq!(classify_role(&["Internal User", "Project / Manager"]), Role::Manager);
        assert_eq!(classify_role(&["Internal User"]), Role::Employee);
        assert_eq!(classify_role::<&str>(&[]), Role::Employee);
    }

    struct Fixture {
        store: Arc<FakeStore>,
        registry: DeviceRegistry,
        resolver: RecipientResolver,
    }

    fn fixture() -> Fixture {
        let store = FakeStore::new();
        let registry = DeviceRegistry::new();
        let resolver = RecipientResolver::new(
            store.clone(),
            registry.clone(),
            vec![2, 6],
            Duration::from_secs(1),
        );
        Fixture { store, registry, resolver }
    }

    fn leave(value: Value) -> ChangeRecord {
        serde_json::from_value(value).unwrap()
    }

    const SESSION: Session = Session { uid: 2 };

    #[tokio::test]
    async fn test_decision_goes_to_linked_user() {
        let f = fixture();
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"], "parent_id": false }));
        f.registry.upsert("jane-phone".into(), Some("70".into()), Role::Employee).await;
        f.registry.upsert("other".into(), Some("71".into()), Role::Employee).await;

        let record = leave(json!({ "id": 42, "state": "validate", "employee_id": [7, "Jane"] }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeaveDecision, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Subject);
        assert_eq!(recipients.tokens.into_iter().collect::<Vec<_>>(), vec!["jane-phone"]);
    }

    #[tokio::test]
    async fn test_decision_falls_back_to_employee_id() {
        let f = fixture();
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": false, "parent_id": false }));
        f.registry.upsert("by-employee".into(), Some("7".into()), Role::Employee).await;

        let record = leave(json!({ "id": 42, "state": "refuse", "employee_id": [7, "Jane"] }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeaveDecision, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Subject);
        assert!(recipients.tokens.contains("by-employee"));
    }

    #[tokio::test]
    async fn test_decision_without_devices_is_unroutable() {
        let f = fixture();
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"] }));
        f.registry.upsert("manager".into(), Some("1".into()), Role::Manager).await;

        let record = leave(json!({ "id": 42, "state": "validate", "employee_id": [7, "Jane"] }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeaveDecision, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Unroutable);
        assert!(recipients.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_officer_only_type_never_reaches_manager() {
        let f = fixture();
        f.store.insert("hr.leave.type", json!({ "id": 3, "name": "Paid Time Off", "leave_validation_type": "hr" }));
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"], "parent_id": [9, "Boss"] }));
        f.store.insert("hr.employee", json!({ "id": 9, "user_id": [90, "boss"], "parent_id": false }));
        f.registry.upsert("officer".into(), Some("6".into()), Role::Validator).await;
        f.registry.upsert("boss".into(), Some("90".into()), Role::Manager).await;

        let record = leave(json!({
            "id": 50, "state": "confirm", "employee_id": [7, "Jane"], "holiday_status_id": [3, "Paid Time Off"]
        }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeavePendingApproval, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Officers);
        assert_eq!(recipients.tokens.into_iter().collect::<Vec<_>>(), vec!["officer"]);
        assert!(f.store.calls_for("hr.employee").is_empty());
    }

    #[tokio::test]
    async fn test_officer_only_without_officer_devices_skips_manager() {
        let f = fixture();
        f.store.insert("hr.leave.type", json!({ "id": 3, "name": "Paid Time Off", "leave_validation_type": "hr" }));
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"], "parent_id": [9, "Boss"] }));
        f.store.insert("hr.employee", json!({ "id": 9, "user_id": [90, "boss"], "parent_id": false }));
        f.registry.upsert("boss".into(), Some("90".into()), Role::Manager).await;
        f.registry.upsert("admin".into(), Some("1".into()), Role::Admin).await;

        let record = leave(json!({
            "id": 50, "state": "confirm", "employee_id": [7, "Jane"], "holiday_status_id": [3, "Paid Time Off"]
        }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeavePendingApproval, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Unroutable);
        assert!(!recipients.tokens.contains("boss"));
        assert!(recipients.tokens.is_empty());
        assert!(f.store.calls_for("hr.employee").is_empty());
    }

    #[tokio::test]
    async fn test_dual_type_goes_to_manager_even_with_officer_keywords() {
        let f = fixture();
        f.store.insert("hr.leave.type", json!({ "id": 4, "name": "HR officer + manager", "leave_validation_type": "both" }));
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"], "parent_id": [9, "Boss"] }));
        f.store.insert("hr.employee", json!({ "id": 9, "user_id": [90, "boss"], "parent_id": false }));
        f.registry.upsert("officer".into(), Some("6".into()), Role::Validator).await;
        f.registry.upsert("boss".into(), Some("90".into()), Role::Manager).await;

        let record = leave(json!({
            "id": 51, "state": "confirm", "employee_id": [7, "Jane"], "holiday_status_id": [4, "Dual"]
        }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeavePendingApproval, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Manager);
        assert_eq!(recipients.tokens.into_iter().collect::<Vec<_>>(), vec!["boss"]);
    }

    #[tokio::test]
    async fn test_missing_manager_broadcasts_to_privileged_roles() {
        let f = fixture();
        f.store.insert("hr.leave.type", json!({ "id": 5, "name": "Sick", "leave_validation_type": "manager" }));
        f.store.insert("hr.employee", json!({ "id": 7, "user_id": [70, "jane"], "parent_id": false }));
        f.registry.upsert("jane".into(), Some("70".into()), Role::Employee).await;
        f.registry.upsert("admin".into(), Some("1".into()), Role::Admin).await;
        f.registry.upsert("hr".into(), Some("3".into()), Role::Validator).await;

        let record = leave(json!({
            "id": 52, "state": "confirm", "employee_id": [7, "Jane"], "holiday_status_id": [5, "Sick"]
        }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeavePendingApproval, &record).await.unwrap();

        assert_eq!(recipients.route, Route::PrivilegedBroadcast);
        assert_eq!(recipients.tokens.into_iter().collect::<Vec<_>>(), vec!["admin", "hr"]);
    }

    #[tokio::test]
    async fn test_pending_without_employee_is_skipped() {
        let f = fixture();
        f.registry.upsert("admin".into(), Some("1".into()), Role::Admin).await;

        let record = leave(json!({ "id": 53, "state": "confirm", "employee_id": false }));
        let recipients = f.resolver.resolve(&SESSION, Category::LeavePendingApproval, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Unroutable);
        assert!(f.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_allocation_goes_to_officers_without_lookup() {
        let f = fixture();
        f.registry.upsert("officer-a".into(), Some("2".into()), Role::Validator).await;
        f.registry.upsert("officer-b".into(), Some("6".into()), Role::Validator).await;
        f.registry.upsert("jane".into(), Some("70".into()), Role::Employee).await;

        let record = leave(json!({ "id": 60, "state": "confirm", "employee_id": [7, "Jane"] }));
        let recipients = f.resolver.resolve(&SESSION, Category::AllocationPending, &record).await.unwrap();

        assert_eq!(recipients.route, Route::Officers);
        assert_eq!(recipients.tokens.len(), 2);
        assert!(f.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_user_role_two_steps() {
        let store = FakeStore::new();
        store.insert("res.users", json!({ "id": 12, "groups_id": [1, 4] }));
        store.insert("res.groups", json!({ "id": 1, "name": "Internal User", "full_name": "User types / Internal User" }));
        store.insert("res.groups", json!({ "id": 4, "name": "Officer", "full_name": "Time Off / Officer" }));
        store.insert("res.groups", json!({ "id": 8, "name": "Manager", "full_name": "Sales / Manager" }));

        let (role, groups) = lookup_user_role(store.as_ref(), Duration::from_secs(1), 12).await.unwrap();
        assert_eq!(role, Role::Validator);
        assert_eq!(groups.len(), 2);
    }
}
