//! Search index schema, and the manager making sure the index exists before anything is written.
use crate::search::SearchIndex;
use crate::{Result, SyncError};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use tracing::info;

/// How a field is stored and searched.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// analyzed full text.
    Text,
    /// exact match.
    Keyword,
    Date,
    Boolean,
    /// nested object, with its own field mappings.
    Object(MappingSpec),
}

impl FieldType {
    fn type_name(&self) -> Option<&'static str> {
        match self {
            FieldType::Text => Some("text"),
            FieldType::Keyword => Some("keyword"),
            FieldType::Date => Some("date"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Object(_) => None,
        }
    }
}

/// One field, optionally indexed a second way through a multi-field (like `city.keyword`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    field_type: FieldType,
    sub_fields: Vec<(String, FieldType)>,
}

impl FieldMapping {
    pub fn new(field_type: FieldType) -> Self {
        FieldMapping {
            field_type,
            sub_fields: vec![],
        }
    }

    /// Add a multi-field named `name`, only scalar types make sense here.
    pub fn with_sub_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.sub_fields.push((name.to_string(), field_type));
        self
    }

    fn to_json(&self) -> Value {
        let mut obj = match (&self.field_type, self.field_type.type_name()) {
            (FieldType::Object(spec), _) => spec.properties(),
            (_, Some(name)) => {
                let mut m = Map::new();
                m.insert("type".to_string(), Value::from(name));
                m
            }
            (_, None) => Map::new(),
        };
        if !self.sub_fields.is_empty() {
            let fields: Map<String, Value> = self
                .sub_fields
                .iter()
                .filter_map(|(name, ty)| {
                    ty.type_name()
                        .map(|t| (name.clone(), json!({ "type": t })))
                })
                .collect();
            obj.insert("fields".to_string(), Value::Object(fields));
        }
        Value::Object(obj)
    }
}

/// Static declaration of field -> type for indexed documents, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingSpec {
    fields: Vec<(String, FieldMapping)>,
}

impl MappingSpec {
    pub fn new() -> Self {
        MappingSpec::default()
    }

    pub fn field(mut self, name: &str, mapping: FieldMapping) -> Self {
        self.fields.push((name.to_string(), mapping));
        self
    }

    pub fn text(self, name: &str) -> Self {
        self.field(name, FieldMapping::new(FieldType::Text))
    }

    pub fn keyword(self, name: &str) -> Self {
        self.field(name, FieldMapping::new(FieldType::Keyword))
    }

    pub fn date(self, name: &str) -> Self {
        self.field(name, FieldMapping::new(FieldType::Date))
    }

    pub fn boolean(self, name: &str) -> Self {
        self.field(name, FieldMapping::new(FieldType::Boolean))
    }

    pub fn object(self, name: &str, spec: MappingSpec) -> Self {
        self.field(name, FieldMapping::new(FieldType::Object(spec)))
    }

    /// look up a top level field.
    pub fn get(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    fn properties(&self) -> Map<String, Value> {
        let props: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, mapping)| (name.clone(), mapping.to_json()))
            .collect();
        let mut obj = Map::new();
        obj.insert("properties".to_string(), Value::Object(props));
        obj
    }

    /// The `mappings` json object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.properties())
    }

    /// Whole request body for index creation.
    pub fn index_body(&self) -> Value {
        json!({ "mappings": self.to_json() })
    }
}

/// Which document model an index holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingProfile {
    /// `subscribers` collection: subscriberName, mobileNumber, SIM, device and operator details.
    Subscribers,
    /// `unified_datasets` collection: records merged from several providers.
    UnifiedDatasets,
}

impl MappingProfile {
    /// Guess the profile from index name, anything unknown is a subscriber index.
    pub fn for_index(index: &str) -> MappingProfile {
        if index.starts_with("unified_dataset") {
            MappingProfile::UnifiedDatasets
        } else {
            MappingProfile::Subscribers
        }
    }

    pub fn mapping(&self) -> MappingSpec {
        match self {
            MappingProfile::Subscribers => subscriber_mapping(),
            MappingProfile::UnifiedDatasets => unified_dataset_mapping(),
        }
    }
}

impl FromStr for MappingProfile {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<MappingProfile> {
        match s.to_ascii_lowercase().as_str() {
            "subscribers" => Ok(MappingProfile::Subscribers),
            "unified_datasets" => Ok(MappingProfile::UnifiedDatasets),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown mapping {:?}, expect subscribers or unified_datasets",
                other
            ))),
        }
    }
}

fn text_with_keyword() -> FieldMapping {
    FieldMapping::new(FieldType::Text).with_sub_field("keyword", FieldType::Keyword)
}

fn keyword_with_text() -> FieldMapping {
    FieldMapping::new(FieldType::Keyword).with_sub_field("text", FieldType::Text)
}

/// Mapping of the `subscribers` index.
///
/// Fields not declared here are still indexed, with types picked by dynamic mapping.
pub fn subscriber_mapping() -> MappingSpec {
    let address = MappingSpec::new()
        .text("street")
        .field("city", text_with_keyword())
        .field("district", text_with_keyword())
        .keyword("state")
        .keyword("pincode");
    let sim_details = MappingSpec::new()
        .keyword("simId")
        .keyword("status")
        .keyword("connectionType")
        .date("activationDate");
    let device_info = MappingSpec::new()
        .keyword("imei")
        .keyword("deviceModel")
        .keyword("deviceBrand");
    let operator_details = MappingSpec::new()
        .keyword("operatorName")
        .keyword("circle")
        .keyword("serviceProvider");
    let fraud_flags = MappingSpec::new()
        .boolean("isSuspicious")
        .keyword("suspiciousReasons")
        .date("flaggedDate");

    MappingSpec::new()
        .field("subscriberName", text_with_keyword())
        .field("fatherName", text_with_keyword())
        .field("mobileNumber", keyword_with_text())
        .object("address", address)
        .object("simDetails", sim_details)
        .object("deviceInfo", device_info)
        .object("operatorDetails", operator_details)
        .object("fraudFlags", fraud_flags)
        .date("createdAt")
        .date("updatedAt")
}

/// Mapping of the `unified_datasets` index.
pub fn unified_dataset_mapping() -> MappingSpec {
    let address = MappingSpec::new()
        .text("street")
        .field("city", text_with_keyword())
        .keyword("state")
        .keyword("postal_code")
        .keyword("country");

    MappingSpec::new()
        .keyword("subscriber_id")
        .keyword("source_provider")
        .text("first_name")
        .text("last_name")
        .field("full_name", text_with_keyword())
        .field("primary_phone", keyword_with_text())
        .keyword("email")
        .object("address", address)
        .keyword("service_type")
        .text("plan_name")
        .keyword("status")
        .keyword("kyc_status")
        .boolean("is_fraud_flagged")
        .date("ingestion_date")
        .date("activation_date")
        .date("createdAt")
        .date("updatedAt")
}

/// Make sure index `name` exists, create it with `mapping` when absent.
///
/// Returns true when the index was created by this call.  Existing indexes are left alone,
/// even when their mappings differ.
pub fn ensure_index(index: &dyn SearchIndex, name: &str, mapping: &MappingSpec) -> Result<bool> {
    if index.index_exists(name)? {
        info!(index = %name, "Index already exists, leave it as it is");
        return Ok(false);
    }
    info!(index = %name, "Creating index");
    index.create_index(name, &mapping.index_body())?;
    info!(index = %name, "Index created");
    Ok(true)
}
