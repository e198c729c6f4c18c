// src/common/schema.rs

//! Declarative attribute schema.
//!
//! An [`AttributeSchema`] maps instrument-independent attribute names (e.g.
//! `"frequency"`) to [`AttributeDescriptor`]s describing the wire field, value
//! type, unit and validation rules, together with the device-level
//! [`DeviceSettings`] that govern framing, chaining and timing.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use super::error::AttributeError;
use super::timing;

/// Direction of an attribute operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => f.write_str("read"),
            AccessKind::Write => f.write_str("write"),
        }
    }
}

/// Access mode declared for an attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    #[inline]
    pub const fn can_read(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    #[inline]
    pub const fn can_write(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }

    /// Whether this mode allows an operation in the given direction.
    pub const fn permits(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Read => self.can_read(),
            AccessKind::Write => self.can_write(),
        }
    }
}

/// Bounds and resolution of a numeric attribute. All parts are optional.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct NumericSpec {
    /// Inclusive lower bound.
    pub min: Option<f64>,
    /// Inclusive upper bound.
    pub max: Option<f64>,
    /// Smallest meaningful increment; values are rounded to a multiple of it.
    pub resolution: Option<f64>,
}

/// Element type of IEEE 488.2 definite-length block data.
///
/// Elements are fixed size and little-endian.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockDataType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl BlockDataType {
    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            BlockDataType::Int8 | BlockDataType::Uint8 => 1,
            BlockDataType::Int16 | BlockDataType::Uint16 => 2,
            BlockDataType::Int32 | BlockDataType::Uint32 | BlockDataType::Float32 => 4,
            BlockDataType::Int64 | BlockDataType::Uint64 | BlockDataType::Float64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, BlockDataType::Float32 | BlockDataType::Float64)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            BlockDataType::Int8 => "int8",
            BlockDataType::Uint8 => "uint8",
            BlockDataType::Int16 => "int16",
            BlockDataType::Uint16 => "uint16",
            BlockDataType::Int32 => "int32",
            BlockDataType::Uint32 => "uint32",
            BlockDataType::Int64 => "int64",
            BlockDataType::Uint64 => "uint64",
            BlockDataType::Float32 => "float32",
            BlockDataType::Float64 => "float64",
        }
    }

    /// Parses a type name such as `"float32"` or `"uint16"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let data_type = match name {
            "int8" => BlockDataType::Int8,
            "uint8" => BlockDataType::Uint8,
            "int16" => BlockDataType::Int16,
            "uint16" => BlockDataType::Uint16,
            "int32" => BlockDataType::Int32,
            "uint32" => BlockDataType::Uint32,
            "int64" => BlockDataType::Int64,
            "uint64" => BlockDataType::Uint64,
            "float32" => BlockDataType::Float32,
            "float64" => BlockDataType::Float64,
            _ => return None,
        };
        Some(data_type)
    }
}

impl fmt::Display for BlockDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value type of an attribute, carrying only the parameters relevant to it.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    String,
    Float(NumericSpec),
    Integer(NumericSpec),
    Boolean,
    /// Boolean view of one bit of the integer register returned by the
    /// descriptor's field (the source field).
    Bit { bit_index: u8 },
    /// Float at position `index` of the space-separated packet returned by
    /// the descriptor's field.
    PacketItem { index: usize },
    /// Definite-length binary block (`#<n><len><data>`) of fixed-size elements.
    Block(BlockDataType),
    /// Argument-less invocation such as `*RST`.
    Command,
}

/// Plain value type tag, used for introspection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueType {
    String,
    Float,
    Integer,
    Boolean,
    Bit,
    PacketItem,
    Block,
    Command,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Float => "float",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Bit => "bit",
            ValueType::PacketItem => "packet_item",
            ValueType::Block => "block",
            ValueType::Command => "command",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level description of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    field: String,
    access: Access,
    kind: ValueKind,
    unit: Option<String>,
    acknowledges_write: bool,
}

impl AttributeDescriptor {
    /// Creates a descriptor with an explicit kind and access mode.
    pub fn new(field: impl Into<String>, kind: ValueKind, access: Access) -> Self {
        AttributeDescriptor {
            field: field.into(),
            access,
            kind,
            unit: None,
            acknowledges_write: false,
        }
    }

    pub fn string(field: impl Into<String>) -> Self {
        Self::new(field, ValueKind::String, Access::ReadWrite)
    }

    pub fn float(field: impl Into<String>) -> Self {
        Self::new(field, ValueKind::Float(NumericSpec::default()), Access::ReadWrite)
    }

    pub fn integer(field: impl Into<String>) -> Self {
        Self::new(field, ValueKind::Integer(NumericSpec::default()), Access::ReadWrite)
    }

    pub fn boolean(field: impl Into<String>) -> Self {
        Self::new(field, ValueKind::Boolean, Access::ReadWrite)
    }

    /// Read-only view of bit `bit_index` of the register returned by `source_field`.
    pub fn bit(source_field: impl Into<String>, bit_index: u8) -> Self {
        Self::new(source_field, ValueKind::Bit { bit_index }, Access::ReadOnly)
    }

    /// Read-only view of item `index` of the packet returned by `source_field`.
    pub fn packet_item(source_field: impl Into<String>, index: usize) -> Self {
        Self::new(source_field, ValueKind::PacketItem { index }, Access::ReadOnly)
    }

    /// Read-only block of `data_type` elements.
    pub fn block(field: impl Into<String>, data_type: BlockDataType) -> Self {
        Self::new(field, ValueKind::Block(data_type), Access::ReadOnly)
    }

    /// Write-only, argument-less command.
    pub fn command(field: impl Into<String>) -> Self {
        Self::new(field, ValueKind::Command, Access::WriteOnly)
    }

    // --- Fluent modifiers ---

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn read_only(self) -> Self {
        self.access(Access::ReadOnly)
    }

    pub fn write_only(self) -> Self {
        self.access(Access::WriteOnly)
    }

    pub fn read_write(self) -> Self {
        self.access(Access::ReadWrite)
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the inclusive lower bound. Ignored for non-numeric kinds.
    pub fn min(mut self, min: f64) -> Self {
        if let Some(spec) = self.numeric_mut() {
            spec.min = Some(min);
        }
        self
    }

    /// Sets the inclusive upper bound. Ignored for non-numeric kinds.
    pub fn max(mut self, max: f64) -> Self {
        if let Some(spec) = self.numeric_mut() {
            spec.max = Some(max);
        }
        self
    }

    pub fn bounds(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    /// Sets the absolute resolution. Ignored for non-numeric kinds.
    pub fn resolution(mut self, resolution: f64) -> Self {
        if let Some(spec) = self.numeric_mut() {
            spec.resolution = Some(resolution);
        }
        self
    }

    /// Declares that the device answers a write of this attribute with one
    /// status token.
    pub fn acknowledges_write(mut self, acknowledges: bool) -> Self {
        self.acknowledges_write = acknowledges;
        self
    }

    // --- Accessors ---

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn access_mode(&self) -> Access {
        self.access
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn writes_acknowledged(&self) -> bool {
        self.acknowledges_write
    }

    pub fn value_type(&self) -> ValueType {
        match self.kind {
            ValueKind::String => ValueType::String,
            ValueKind::Float(_) => ValueType::Float,
            ValueKind::Integer(_) => ValueType::Integer,
            ValueKind::Boolean => ValueType::Boolean,
            ValueKind::Bit { .. } => ValueType::Bit,
            ValueKind::PacketItem { .. } => ValueType::PacketItem,
            ValueKind::Block(_) => ValueType::Block,
            ValueKind::Command => ValueType::Command,
        }
    }

    pub fn numeric(&self) -> Option<&NumericSpec> {
        match &self.kind {
            ValueKind::Float(spec) | ValueKind::Integer(spec) => Some(spec),
            _ => None,
        }
    }

    fn numeric_mut(&mut self) -> Option<&mut NumericSpec> {
        match &mut self.kind {
            ValueKind::Float(spec) | ValueKind::Integer(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn bit_index(&self) -> Option<u8> {
        match self.kind {
            ValueKind::Bit { bit_index } => Some(bit_index),
            _ => None,
        }
    }

    pub fn packet_index(&self) -> Option<usize> {
        match self.kind {
            ValueKind::PacketItem { index } => Some(index),
            _ => None,
        }
    }

    pub fn block_data_type(&self) -> Option<BlockDataType> {
        match self.kind {
            ValueKind::Block(data_type) => Some(data_type),
            _ => None,
        }
    }

    /// The register or packet field a bit or packet-item attribute decodes from.
    pub fn source_field(&self) -> Option<&str> {
        match self.kind {
            ValueKind::Bit { .. } | ValueKind::PacketItem { .. } => Some(&self.field),
            _ => None,
        }
    }
}

/// A named descriptor, as stored in the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    descriptor: AttributeDescriptor,
}

impl Attribute {
    /// Pairs a name with a descriptor without schema-level validation.
    pub fn new(name: impl Into<String>, descriptor: AttributeDescriptor) -> Self {
        Attribute {
            name: name.into(),
            descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &AttributeDescriptor {
        &self.descriptor
    }

    pub fn info(&self) -> AttributeInfo<'_> {
        let numeric = self.descriptor.numeric().copied().unwrap_or_default();
        AttributeInfo {
            name: &self.name,
            field: &self.descriptor.field,
            access: self.descriptor.access,
            value_type: self.descriptor.value_type(),
            unit: self.descriptor.unit_name(),
            min: numeric.min,
            max: numeric.max,
            resolution: numeric.resolution,
        }
    }
}

/// Introspection record for one attribute.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AttributeInfo<'a> {
    pub name: &'a str,
    pub field: &'a str,
    pub access: Access,
    pub value_type: ValueType,
    pub unit: Option<&'a str>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub resolution: Option<f64>,
}

/// Device-level protocol settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Interval between samples when polling.
    pub poll_rate: Duration,
    /// Maximum time to wait for a complete reply.
    pub timeout: Duration,
    /// Whether several operations may be sent in one message.
    pub supports_chains: bool,
    /// Terminator of a reply; also appended to each outgoing message.
    pub sentinel: Vec<u8>,
    /// Placed between chained operations.
    pub argument_separator: String,
    /// Placed between a field and its value in a write.
    pub value_separator: String,
    /// Reply delimiter, when it differs from `argument_separator`.
    pub reply_separator: Option<String>,
    /// Appended to a field to form a query (`"?"` in strict SCPI).
    pub query_suffix: String,
    /// Whether one chained message may contain both reads and writes.
    pub allow_mixed_batches: bool,
    /// Largest reply accepted before the sentinel.
    pub max_reply_len: usize,
}

impl DeviceSettings {
    /// Delimiter used to split replies.
    pub fn reply_separator(&self) -> &str {
        self.reply_separator
            .as_deref()
            .unwrap_or(&self.argument_separator)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            poll_rate: timing::DEFAULT_POLL_RATE,
            timeout: timing::DEFAULT_TIMEOUT,
            supports_chains: false,
            sentinel: timing::DEFAULT_SENTINEL.to_vec(),
            argument_separator: String::from(";"),
            value_separator: String::from(" "),
            reply_separator: None,
            query_suffix: String::new(),
            allow_mixed_batches: true,
            max_reply_len: timing::DEFAULT_MAX_REPLY_LEN,
        }
    }
}

/// Attribute schema of one instrument model. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    model: String,
    attributes: Vec<Attribute>,
    index: BTreeMap<String, usize>,
    settings: DeviceSettings,
}

impl AttributeSchema {
    pub fn builder(model: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            model: model.into(),
            attributes: Vec::new(),
            settings: DeviceSettings::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks up an attribute by name.
    pub fn resolve(&self, name: &str) -> Result<&Attribute, AttributeError> {
        self.index
            .get(name)
            .map(|&i| &self.attributes[i])
            .ok_or_else(|| AttributeError::UnknownAttribute { name: String::from(name) })
    }

    pub fn access_of(&self, name: &str) -> Result<Access, AttributeError> {
        Ok(self.resolve(name)?.descriptor.access)
    }

    /// Resolves `name` and checks it permits `operation`.
    pub fn resolve_for(&self, name: &str, operation: AccessKind) -> Result<&Attribute, AttributeError> {
        let attribute = self.resolve(name)?;
        if attribute.descriptor.access.permits(operation) {
            Ok(attribute)
        } else {
            Err(AttributeError::AccessViolation {
                name: String::from(name),
                operation,
            })
        }
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.attributes.iter().map(|a| a.name())
    }

    pub fn info(&self, name: &str) -> Result<AttributeInfo<'_>, AttributeError> {
        Ok(self.resolve(name)?.info())
    }

    /// All attributes whose wire field is `field`.
    pub fn attributes_for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Attribute> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.descriptor.field == field)
    }
}

/// Builder for [`AttributeSchema`]; validation happens in [`SchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    model: String,
    attributes: Vec<(String, AttributeDescriptor)>,
    settings: DeviceSettings,
}

impl SchemaBuilder {
    pub fn attribute(mut self, name: impl Into<String>, descriptor: AttributeDescriptor) -> Self {
        self.attributes.push((name.into(), descriptor));
        self
    }

    pub fn settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn poll_rate(mut self, poll_rate: Duration) -> Self {
        self.settings.poll_rate = poll_rate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn supports_chains(mut self, supports_chains: bool) -> Self {
        self.settings.supports_chains = supports_chains;
        self
    }

    pub fn sentinel(mut self, sentinel: impl Into<Vec<u8>>) -> Self {
        self.settings.sentinel = sentinel.into();
        self
    }

    pub fn argument_separator(mut self, separator: impl Into<String>) -> Self {
        self.settings.argument_separator = separator.into();
        self
    }

    pub fn value_separator(mut self, separator: impl Into<String>) -> Self {
        self.settings.value_separator = separator.into();
        self
    }

    pub fn reply_separator(mut self, separator: impl Into<String>) -> Self {
        self.settings.reply_separator = Some(separator.into());
        self
    }

    pub fn query_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.settings.query_suffix = suffix.into();
        self
    }

    pub fn allow_mixed_batches(mut self, allow: bool) -> Self {
        self.settings.allow_mixed_batches = allow;
        self
    }

    pub fn max_reply_len(mut self, max_reply_len: usize) -> Self {
        self.settings.max_reply_len = max_reply_len;
        self
    }

    /// Validates every declaration and produces the immutable schema.
    pub fn build(self) -> Result<AttributeSchema, AttributeError> {
        let settings = self.settings;
        validate_settings(&settings)?;

        let mut attributes = Vec::with_capacity(self.attributes.len());
        let mut index = BTreeMap::new();
        for (name, descriptor) in self.attributes {
            if name.is_empty() {
                return Err(invalid("attribute name must not be empty"));
            }
            if index.contains_key(&name) {
                return Err(invalid(format!("duplicate attribute '{}'", name)));
            }
            validate_descriptor(&name, &descriptor, &settings)?;
            index.insert(name.clone(), attributes.len());
            attributes.push(Attribute { name, descriptor });
        }

        tracing::debug!(
            model = %self.model,
            attributes = attributes.len(),
            chains = settings.supports_chains,
            "built attribute schema"
        );

        Ok(AttributeSchema {
            model: self.model,
            attributes,
            index,
            settings,
        })
    }
}

// --- Validation helpers ---

fn invalid(msg: impl Into<String>) -> AttributeError {
    AttributeError::InvalidSchema(msg.into())
}

/// Whether `haystack` contains `needle` as a contiguous byte sequence.
pub(crate) fn contains_seq(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn validate_settings(settings: &DeviceSettings) -> Result<(), AttributeError> {
    if settings.sentinel.is_empty() {
        return Err(invalid("sentinel must not be empty"));
    }
    if settings.argument_separator.is_empty() {
        return Err(invalid("argument separator must not be empty"));
    }
    if settings.value_separator.is_empty() {
        return Err(invalid("value separator must not be empty"));
    }
    if matches!(settings.reply_separator.as_deref(), Some("")) {
        return Err(invalid("reply separator must not be empty"));
    }
    let separator = settings.argument_separator.as_bytes();
    if contains_seq(settings.value_separator.as_bytes(), separator)
        || contains_seq(settings.query_suffix.as_bytes(), separator)
    {
        return Err(invalid("argument separator must not appear in the value separator or query suffix"));
    }
    if settings.max_reply_len == 0 {
        return Err(invalid("maximum reply length must be positive"));
    }
    Ok(())
}

fn validate_descriptor(
    name: &str,
    descriptor: &AttributeDescriptor,
    settings: &DeviceSettings,
) -> Result<(), AttributeError> {
    let field = descriptor.field.as_bytes();
    if field.is_empty() {
        return Err(invalid(format!("attribute '{}' has an empty field", name)));
    }
    let framing: [&[u8]; 4] = [
        settings.argument_separator.as_bytes(),
        settings.value_separator.as_bytes(),
        settings.reply_separator().as_bytes(),
        &settings.sentinel,
    ];
    if framing.iter().any(|seq| contains_seq(field, seq)) {
        return Err(invalid(format!(
            "field '{}' of attribute '{}' contains framing bytes",
            descriptor.field, name
        )));
    }

    match &descriptor.kind {
        ValueKind::Float(spec) | ValueKind::Integer(spec) => validate_numeric(name, spec)?,
        ValueKind::Bit { bit_index } => {
            if *bit_index > 63 {
                return Err(invalid(format!(
                    "bit attribute '{}' has bit index {} (max 63)",
                    name, bit_index
                )));
            }
            if !descriptor.access.can_read() {
                return Err(invalid(format!("bit attribute '{}' must be readable", name)));
            }
        }
        ValueKind::PacketItem { .. } | ValueKind::Block(_) => {
            if !descriptor.access.can_read() {
                return Err(invalid(format!("attribute '{}' decodes replies and must be readable", name)));
            }
            // Packet items are space separated inside one reply token.
            if matches!(descriptor.kind, ValueKind::PacketItem { .. }) && settings.reply_separator().contains(' ') {
                return Err(invalid(format!(
                    "packet attribute '{}' needs a reply separator without spaces",
                    name
                )));
            }
        }
        ValueKind::Command => {
            if descriptor.access != Access::WriteOnly {
                return Err(invalid(format!("command attribute '{}' must be write-only", name)));
            }
        }
        ValueKind::String | ValueKind::Boolean => {}
    }
    Ok(())
}

fn validate_numeric(name: &str, spec: &NumericSpec) -> Result<(), AttributeError> {
    for bound in [spec.min, spec.max].into_iter().flatten() {
        if !bound.is_finite() {
            return Err(invalid(format!("attribute '{}' has a non-finite bound", name)));
        }
    }
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        if min > max {
            return Err(invalid(format!(
                "attribute '{}' has min {} greater than max {}",
                name, min, max
            )));
        }
    }
    if let Some(resolution) = spec.resolution {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(invalid(format!(
                "attribute '{}' has resolution {}; it must be positive",
                name, resolution
            )));
        }
    }
    Ok(())
}
