//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message schema helpers and protocol codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::TimeDelta;
use indexmap::IndexMap;
use r_cbx_common::time::{duration_from_wire_secs, duration_to_wire_secs};
use r_cbx_common::UseCase;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

use crate::Result;

/// Numeric message type carried in the `Type` field of every frame.
///
/// The discriminants are part of the wire contract with the UI and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRepr, Display)]
#[serde(try_from = "i32", into = "i32")]
#[strum(serialize_all = "kebab-case")]
#[repr(i32)]
#[allow(missing_docs)]
pub enum MessageType {
    Text = 0,
    QrCode = 1,
    Acknowledge = 2,
    ServiceListChanged = 3,
    GetServiceList = 4,
    SelectService = 5,
    GetEntityInfos = 6,
    GetUseCaseInfos = 7,
    GetAllData = 8,
    SetConsumptionLimit = 9,
    GetConsumptionLimit = 10,
    SetProductionLimit = 11,
    GetProductionLimit = 12,
    SetConsumptionFailsafeValue = 13,
    GetConsumptionFailsafeValue = 14,
    SetConsumptionFailsafeDuration = 15,
    GetConsumptionFailsafeDuration = 16,
    SetProductionFailsafeValue = 17,
    GetProductionFailsafeValue = 18,
    SetProductionFailsafeDuration = 19,
    GetProductionFailsafeDuration = 20,
    GetConsumptionNominalMax = 21,
    GetProductionNominalMax = 22,
    GetConsumptionHeartbeat = 23,
    StopConsumptionHeartbeat = 24,
    StartConsumptionHeartbeat = 25,
    GetProductionHeartbeat = 26,
    StopProductionHeartbeat = 27,
    StartProductionHeartbeat = 28,
    GetPowerLimitationFactor = 29,
    GetPower = 30,
    GetPowerPerPhase = 31,
    GetEnergyFeedIn = 32,
    GetEnergyConsumed = 33,
    GetCurrentPerPhase = 34,
    GetVoltagePerPhase = 35,
    GetFrequency = 36,
}

/// Raised when a frame carries a `Type` code outside the fixed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type {0}")]
pub struct UnknownMessageType(pub i32);

impl TryFrom<i32> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        MessageType::from_repr(value).ok_or(UnknownMessageType(value))
    }
}

impl From<MessageType> for i32 {
    fn from(value: MessageType) -> Self {
        value as i32
    }
}

/// Limit payload as exchanged with the UI. `Duration` is whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireLimit {
    /// Whether the limit is currently enforced.
    pub is_active: bool,
    /// Validity of the limit in whole seconds.
    pub duration: i64,
    /// Limit value in watts.
    pub value: f64,
}

impl WireLimit {
    /// Build a wire limit from an internal duration, truncating to whole seconds.
    pub fn new(is_active: bool, value: f64, duration: TimeDelta) -> Self {
        Self {
            is_active,
            duration: duration_to_wire_secs(duration),
            value,
        }
    }

    /// Internal representation of the `Duration` field.
    pub fn duration(&self) -> TimeDelta {
        duration_from_wire_secs(self.duration)
    }
}

/// Discovery record of a remote service as shown in the UI service list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RemoteService {
    /// Human readable service name.
    pub name: String,
    /// Subject key identifier, the stable identity of the remote.
    pub ski: String,
    /// Protocol level identifier.
    pub identifier: String,
    /// Device brand.
    pub brand: String,
    /// Device type.
    #[serde(rename = "Type")]
    pub device_type: String,
    /// Device model.
    pub model: String,
}

impl RemoteService {
    /// Convenience constructor used by discovery adapters and tests.
    pub fn new(ski: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ski: ski.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One entity of a remote device as listed in the device inspector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EntityInfo {
    /// Entity address rendered as text.
    pub address: String,
    /// Entity type name.
    pub name: String,
    /// Owning device identity.
    #[serde(rename = "SKI")]
    pub ski: String,
    /// Device type of the owning device.
    #[serde(rename = "Type")]
    pub device_type: String,
    /// Features rendered as `"<feature>, <role>"`.
    pub features: Vec<String>,
}

/// Use cases supported by one actor of a remote device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UseCaseInfo {
    /// Actor role, e.g. `ControllableSystem`.
    pub actor: String,
    /// Use case names supported in that role.
    pub names: Vec<String>,
}

/// Use-case summaries keyed by device identity, in registry order.
pub type UseCaseInfos = IndexMap<String, Vec<UseCaseInfo>>;

/// The single envelope used for every UI push and every UI command.
///
/// Optional collections serialize as `null` when absent, which is what the UI
/// expects for messages that do not carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UiMessage {
    /// Identity the message refers to, empty when not device specific.
    #[serde(rename = "SKI", default)]
    pub ski: String,
    /// Message type code.
    #[serde(rename = "Type")]
    pub kind: MessageType,
    /// Free text; carries the selected identity for `SelectService` and the
    /// use case for `GetAllData`.
    #[serde(default)]
    pub text: String,
    /// Limit payload.
    #[serde(default)]
    pub limit: WireLimit,
    /// Scalar value payload.
    #[serde(default)]
    pub value: f64,
    /// Array payload, e.g. per-phase readings.
    #[serde(default)]
    pub values: Option<Vec<f64>>,
    /// Discovered remote services.
    #[serde(default)]
    pub service_list: Option<Vec<RemoteService>>,
    /// Entity snapshot across all known devices.
    #[serde(default)]
    pub entity_infos: Option<Vec<EntityInfo>>,
    /// Use-case snapshot across all known devices.
    #[serde(default)]
    pub use_case_infos: Option<UseCaseInfos>,
    /// Use case tag that produced a value push.
    #[serde(default)]
    pub use_case: String,
}

impl UiMessage {
    /// Empty message of the given type.
    pub fn new(kind: MessageType) -> Self {
        Self {
            ski: String::new(),
            kind,
            text: String::new(),
            limit: WireLimit::default(),
            value: 0.0,
            values: None,
            service_list: None,
            entity_infos: None,
            use_case_infos: None,
            use_case: String::new(),
        }
    }

    /// Bare notification, optionally scoped to a device and use case.
    pub fn notification(ski: &str, kind: MessageType, use_case: Option<UseCase>) -> Self {
        Self {
            ski: ski.to_owned(),
            use_case: use_case.map(|uc| uc.to_string()).unwrap_or_default(),
            ..Self::new(kind)
        }
    }

    /// Text message such as the QR code or the selected service.
    pub fn text(kind: MessageType, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::new(kind)
        }
    }

    /// Scalar value observed on a device.
    pub fn value(ski: &str, kind: MessageType, use_case: UseCase, value: f64) -> Self {
        Self {
            value,
            ..Self::notification(ski, kind, Some(use_case))
        }
    }

    /// Array of values observed on a device.
    pub fn values(ski: &str, kind: MessageType, use_case: UseCase, values: Vec<f64>) -> Self {
        Self {
            values: Some(values),
            ..Self::notification(ski, kind, Some(use_case))
        }
    }

    /// Limit observed on a device or held in the working set.
    pub fn limit(ski: &str, kind: MessageType, use_case: UseCase, limit: WireLimit) -> Self {
        Self {
            limit,
            ..Self::notification(ski, kind, Some(use_case))
        }
    }

    /// Full service list.
    pub fn service_list(kind: MessageType, services: Vec<RemoteService>) -> Self {
        Self {
            service_list: Some(services),
            ..Self::new(kind)
        }
    }

    /// Entity snapshot.
    pub fn entity_infos(kind: MessageType, infos: Vec<EntityInfo>) -> Self {
        Self {
            entity_infos: Some(infos),
            ..Self::new(kind)
        }
    }

    /// Use-case snapshot.
    pub fn use_case_infos(kind: MessageType, infos: UseCaseInfos) -> Self {
        Self {
            use_case_infos: Some(infos),
            ..Self::new(kind)
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame sent by the UI.
    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn type_codes_match_the_wire_contract() {
        assert_eq!(i32::from(MessageType::Text), 0);
        assert_eq!(i32::from(MessageType::Acknowledge), 2);
        assert_eq!(i32::from(MessageType::SetConsumptionLimit), 9);
        assert_eq!(i32::from(MessageType::GetProductionNominalMax), 22);
        assert_eq!(i32::from(MessageType::GetFrequency), 36);
        assert_eq!(MessageType::try_from(5), Ok(MessageType::SelectService));
        assert_eq!(MessageType::try_from(37), Err(UnknownMessageType(37)));
        assert_eq!(MessageType::SelectService.to_string(), "select-service");
    }

    #[test]
    fn value_push_uses_pascal_case_envelope() {
        let message = UiMessage::value("ski-1", MessageType::GetPower, UseCase::Mgcp, 1250.5);
        let encoded: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(encoded["SKI"], json!("ski-1"));
        assert_eq!(encoded["Type"], json!(30));
        assert_eq!(encoded["Value"], json!(1250.5));
        assert_eq!(encoded["UseCase"], json!("MGCP"));
        assert_eq!(encoded["Values"], Value::Null);
        assert_eq!(
            encoded["Limit"],
            json!({"IsActive": false, "Duration": 0, "Value": 0.0})
        );
    }

    #[test]
    fn limit_duration_crosses_the_boundary_in_seconds() {
        let limit = WireLimit::new(true, 2000.0, TimeDelta::seconds(300));
        assert_eq!(limit.duration, 300);
        assert_eq!(limit.duration(), TimeDelta::seconds(300));
    }

    #[test]
    fn decodes_sparse_ui_commands() {
        let command = UiMessage::decode(
            r#"{"Type":9,"Limit":{"IsActive":true,"Duration":300,"Value":2000}}"#,
        )
        .unwrap();
        assert_eq!(command.kind, MessageType::SetConsumptionLimit);
        assert!(command.limit.is_active);
        assert_eq!(command.limit.duration(), TimeDelta::seconds(300));
        assert_eq!(command.limit.value, 2000.0);
        assert!(command.ski.is_empty());

        let select = UiMessage::decode(r#"{"Type":5,"Text":"ski-2"}"#).unwrap();
        assert_eq!(select.kind, MessageType::SelectService);
        assert_eq!(select.text, "ski-2");
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(UiMessage::decode("not json").is_err());
        assert!(UiMessage::decode(r#"{"Text":"missing type"}"#).is_err());
        assert!(UiMessage::decode(r#"{"Type":99}"#).is_err());
        assert!(UiMessage::decode(r#"{"Type":13,"Value":"fast"}"#).is_err());
    }

    #[test]
    fn use_case_infos_keep_registry_order() {
        let mut infos = UseCaseInfos::new();
        infos.insert(
            "ski-b".into(),
            vec![UseCaseInfo {
                actor: "ControllableSystem".into(),
                names: vec!["limitationOfPowerConsumption".into()],
            }],
        );
        infos.insert("ski-a".into(), Vec::new());
        let encoded = UiMessage::use_case_infos(MessageType::GetUseCaseInfos, infos)
            .encode()
            .unwrap();
        let b = encoded.find("ski-b").unwrap();
        let a = encoded.find("ski-a").unwrap();
        assert!(b < a);
        assert!(encoded.contains(r#""Actor":"ControllableSystem""#));
    }
}
