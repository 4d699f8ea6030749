use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Timestamp layout used by the record store for `write_date` and friends.
pub const ODOO_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_odoo_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), ODOO_DATETIME_FORMAT).ok()
}

pub fn format_odoo_datetime(value: &NaiveDateTime) -> String {
    value.format(ODOO_DATETIME_FORMAT).to_string()
}

/// A many2one reference, sent by the store as `[id, "display name"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRef {
    pub id: i64,
    pub name: String,
}

/// One row of a monitored collection. Empty fields come back as `false`
/// and are read as `None`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "odoo_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "odoo_text")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "many2one")]
    pub employee_id: Option<RecordRef>,
    #[serde(default, deserialize_with = "many2one")]
    pub holiday_status_id: Option<RecordRef>,
    #[serde(default, deserialize_with = "odoo_text")]
    pub date_from: Option<String>,
    #[serde(default, deserialize_with = "odoo_text")]
    pub date_to: Option<String>,
    #[serde(default, deserialize_with = "odoo_number")]
    pub number_of_days: Option<f64>,
    #[serde(default, deserialize_with = "odoo_datetime")]
    pub write_date: Option<NaiveDateTime>,
}

impl ChangeRecord {
    pub fn employee_name(&self) -> &str {
        self.employee_id.as_ref().map(|r| r.name.as_str()).unwrap_or_default()
    }

    pub fn leave_type_name(&self) -> &str {
        self.holiday_status_id.as_ref().map(|r| r.name.as_str()).unwrap_or_default()
    }

    pub fn days_text(&self) -> String {
        self.number_of_days.map(|d| d.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeLink {
    #[serde(default, deserialize_with = "many2one")]
    pub user_id: Option<RecordRef>,
    #[serde(default, deserialize_with = "many2one")]
    pub parent_id: Option<RecordRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveType {
    #[serde(default, deserialize_with = "odoo_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "odoo_text")]
    pub leave_validation_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserGroups {
    #[serde(default)]
    pub groups_id: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupName {
    #[serde(default, deserialize_with = "odoo_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "odoo_text")]
    pub full_name: Option<String>,
}

fn odoo_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn odoo_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_f64())
}

fn odoo_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(odoo_text(deserializer)?.as_deref().and_then(parse_odoo_datetime))
}

fn many2one<'de, D>(deserializer: D) -> Result<Option<RecordRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Some(pair) = value.as_array() else {
        return Ok(None);
    };
    let id = pair.first().and_then(Value::as_i64);
    let name = pair.get(1).and_then(Value::as_str).unwrap_or_default();
    Ok(id.map(|id| RecordRef {
        id,
        name: name.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_record_reads_false_as_absent() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "id": 42,
            "name": false,
            "state": "validate",
            "employee_id": [7, "Jane"],
            "holiday_status_id": false,
            "date_from": "2026-03-02 08:00:00",
            "date_to": false,
            "number_of_days": 1.5,
            "write_date": "2026-03-01 10:15:00"
        }))
        .unwrap();

        assert_eq!(record.name, None);
        assert_eq!(record.employee_id, Some(RecordRef { id: 7, name: "Jane".to_string() }));
        assert_eq!(record.leave_type_name(), "");
        assert_eq!(record.date_to, None);
        assert_eq!(record.days_text(), "1.5");
        assert_eq!(
            record.write_date.map(|d| format_odoo_datetime(&d)).as_deref(),
            Some("2026-03-01 10:15:00")
        );
    }

    #[test]
    fn test_missing_fields_default_to_none() {
        let record: ChangeRecord = serde_json::from_value(json!({ "id": 1 })).unwrap();
        assert!(record.employee_id.is_none());
        assert!(record.write_date.is_none());
        assert_eq!(record.employee_name(), "");
    }

    #[test]
    fn test_whole_days_render_without_fraction() {
        let record: ChangeRecord =
            serde_json::from_value(json!({ "id": 1, "number_of_days": 2.0 })).unwrap();
        assert_eq!(record.days_text(), "2");
    }
}
