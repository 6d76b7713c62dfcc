//! Resource and provider schemas
//!
//! Each attribute carries the flags Terraform understands (required,
//! optional, computed, sensitive) plus the provider-side behaviour that
//! drives planning: force-new, defaults and validation.

use crate::diagnostic::Diagnostic;
use crate::state::DynamicValue;

/// Validation hook run against a configured, known value
pub type ValidateFn = fn(&DynamicValue) -> Result<(), String>;

/// Value type of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Bool,
    Number,
    Map(Box<AttributeType>),
}

impl AttributeType {
    fn accepts(&self, value: &DynamicValue) -> bool {
        match (self, value) {
            (_, DynamicValue::Null | DynamicValue::Unknown) => true,
            (AttributeType::String, DynamicValue::String(_)) => true,
            (AttributeType::Bool, DynamicValue::Bool(_)) => true,
            (AttributeType::Number, DynamicValue::Number(_)) => true,
            (AttributeType::Map(inner), DynamicValue::Map(m)) => m.values().all(|v| inner.accepts(v)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttributeType,
    pub description: &'static str,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub force_new: bool,
    pub default: Option<DynamicValue>,
    pub validate: Option<ValidateFn>,
}

impl Attribute {
    fn new(name: &'static str, ty: AttributeType) -> Self {
        Self {
            name,
            ty,
            description: "",
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            force_new: false,
            default: None,
            validate: None,
        }
    }

    pub fn required(name: &'static str, ty: AttributeType) -> Self {
        Self {
            required: true,
            ..Self::new(name, ty)
        }
    }

    pub fn optional(name: &'static str, ty: AttributeType) -> Self {
        Self {
            optional: true,
            ..Self::new(name, ty)
        }
    }

    pub fn computed(name: &'static str, ty: AttributeType) -> Self {
        Self {
            computed: true,
            ..Self::new(name, ty)
        }
    }

    /// Also computed by the provider when left unset
    pub fn and_computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn default(mut self, value: DynamicValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn validate(mut self, f: ValidateFn) -> Self {
        self.validate = Some(f);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

/// Nested block, e.g. the provider's repeatable `remote` block
#[derive(Debug, Clone)]
pub struct NestedBlock {
    pub type_name: &'static str,
    pub block: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub attributes: Vec<Attribute>,
    pub block_types: Vec<NestedBlock>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub version: i64,
    pub block: Block,
}

impl Schema {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            version: 0,
            block: Block {
                attributes,
                block_types: Vec::new(),
            },
        }
    }

    pub fn with_block(mut self, type_name: &'static str, attributes: Vec<Attribute>) -> Self {
        self.block.block_types.push(NestedBlock {
            type_name,
            block: Block {
                attributes,
                block_types: Vec::new(),
            },
        });
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.iter().find(|a| a.name == name)
    }

    /// Check a resource configuration: required fields, value types and
    /// validation hooks. Unknown values are skipped until they are known.
    pub fn validate(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for attr in &self.block.attributes {
            let value = config.get(attr.name).unwrap_or(&DynamicValue::Null);

            if attr.required && value.is_null() {
                diagnostics.push(
                    Diagnostic::error(
                        "Missing required argument",
                        format!("The argument \"{}\" is required, but no definition was found.", attr.name),
                    )
                    .with_attribute(attr.name),
                );
                continue;
            }

            if !attr.required && !attr.optional && !value.is_null() && !value.is_unknown() {
                diagnostics.push(
                    Diagnostic::error(
                        "Value for unconfigurable attribute",
                        format!("Can't configure a value for \"{}\": its value will be decided automatically.", attr.name),
                    )
                    .with_attribute(attr.name),
                );
                continue;
            }

            if !attr.ty.accepts(value) {
                diagnostics.push(
                    Diagnostic::error(
                        "Incorrect attribute value type",
                        format!("Inappropriate value for attribute \"{}\".", attr.name),
                    )
                    .with_attribute(attr.name),
                );
                continue;
            }

            if let Some(validate) = attr.validate {
                if value.is_null() || value.is_unknown() {
                    continue;
                }
                if let Err(detail) = validate(value) {
                    diagnostics.push(
                        Diagnostic::error("Invalid attribute value", detail).with_attribute(attr.name),
                    );
                }
            }
        }

        diagnostics
    }

    /// Fill unset attributes that carry a default
    pub fn apply_defaults(&self, value: &mut DynamicValue) {
        for attr in &self.block.attributes {
            let Some(default) = &attr.default else {
                continue;
            };
            if value.get(attr.name).map_or(true, DynamicValue::is_null) {
                value.set(attr.name, default.clone());
            }
        }
    }

    /// Reshape a state object so it carries exactly the schema's attributes
    pub fn conform(&self, value: &DynamicValue) -> DynamicValue {
        DynamicValue::Map(
            self.block
                .attributes
                .iter()
                .map(|a| {
                    let v = value.get(a.name).cloned().unwrap_or_default();
                    (a.name.to_string(), v)
                })
                .collect(),
        )
    }

    /// Force-new attributes whose planned value differs from the prior state
    pub fn requires_replace(&self, prior: &DynamicValue, planned: &DynamicValue) -> Vec<String> {
        self.block
            .attributes
            .iter()
            .filter(|a| a.force_new)
            .filter(|a| {
                let before = prior.get(a.name).unwrap_or(&DynamicValue::Null);
                let after = planned.get(a.name).unwrap_or(&DynamicValue::Null);
                if after.is_unknown() {
                    return false;
                }
                // Optional+computed fields left unset keep whatever the server chose
                if a.computed && after.is_null() {
                    return false;
                }
                before != after
            })
            .map(|a| a.name.to_string())
            .collect()
    }

    /// Names of the computed attributes
    pub fn computed_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.block.attributes.iter().filter(|a| a.computed)
    }
}

/// Check a string value against a fixed set of accepted values
pub fn one_of(value: &DynamicValue, allowed: &[&str]) -> Result<(), String> {
    match value.as_string() {
        Some(s) if allowed.contains(&s) => Ok(()),
        Some(s) => Err(format!("\"{}\" must be one of: {}", s, allowed.join(", "))),
        None => Err("expected a string".to_string()),
    }
}

/// Schema of the `provider "lxd"` block
pub fn provider_schema() -> Schema {
    Schema::new(vec![
        Attribute::optional("config_dir", AttributeType::String)
            .describe("Directory holding client.crt, client.key and servercerts/"),
        Attribute::optional("accept_remote_certificate", AttributeType::Bool)
            .describe("Accept the server certificate without verification"),
        Attribute::optional("request_timeout", AttributeType::Number)
            .describe("Timeout in seconds for each LXD API request"),
    ])
    .with_block(
        "remote",
        vec![
            Attribute::required("name", AttributeType::String),
            Attribute::required("address", AttributeType::String),
            Attribute::optional("port", AttributeType::String),
            Attribute::optional("scheme", AttributeType::String),
            Attribute::optional("password", AttributeType::String).sensitive(),
            Attribute::optional("default", AttributeType::Bool),
        ],
    )
}
