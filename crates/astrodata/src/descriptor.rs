//! Metadata descriptors and classification tags.
//!
//! Instrument-specific layers compute typed values and labels from a
//! container without mutating it. Only the interfaces live here, together
//! with [`KeywordDescriptor`], the plain keyword lookup most descriptors
//! reduce to.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::fits::{Header, Value};
use crate::headers::HeaderCollection;
use crate::provider::Provider;
use crate::view::View;

/// The value of a descriptor: one scalar, or one entry per addressed unit.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl DescriptorValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            DescriptorValue::Scalar(v) => Some(v),
            DescriptorValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            DescriptorValue::List(v) => Some(v),
            DescriptorValue::Scalar(_) => None,
        }
    }
}

/// A read-only computation over the units addressed by a view.
///
/// A single view stands for one unit, a full view for the whole container.
/// `Ok(None)` means the descriptor does not apply.
pub trait Descriptor {
    fn name(&self) -> &str;

    fn evaluate(&self, view: &View<'_>) -> Result<Option<DescriptorValue>>;
}

/// Classification of a container into a set of labels.
pub trait Tags {
    fn tags(&self, provider: &Provider) -> BTreeSet<String>;
}

impl<F> Tags for F
where
    F: Fn(&Provider) -> BTreeSet<String>,
{
    fn tags(&self, provider: &Provider) -> BTreeSet<String> {
        self(provider)
    }
}

/// A descriptor that reads one keyword, either from the primary metadata
/// or from every addressed unit.
#[derive(Debug, Clone)]
pub struct KeywordDescriptor {
    pub keyword: String,
    /// Read the unit records instead of the primary metadata.
    pub on_ext: bool,
    /// Substituted where the keyword is missing. Without one, a missing
    /// keyword is a [`crate::Error::MissingKey`].
    pub default: Option<Value>,
}

impl KeywordDescriptor {
    pub fn new(keyword: &str) -> Self {
        KeywordDescriptor {
            keyword: keyword.to_string(),
            on_ext: false,
            default: None,
        }
    }

    pub fn on_ext(mut self, on_ext: bool) -> Self {
        self.on_ext = on_ext;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn lookup(&self, records: HeaderCollection<&Header>) -> Result<Vec<Value>> {
        match (records.get_all(&self.keyword), &self.default) {
            (Ok(values), _) => Ok(values),
            (Err(missing), Some(default)) => Ok(missing.fill(default)),
            (Err(missing), None) => Err(missing.into()),
        }
    }
}

impl Descriptor for KeywordDescriptor {
    fn name(&self) -> &str {
        &self.keyword
    }

    fn evaluate(&self, view: &View<'_>) -> Result<Option<DescriptorValue>> {
        if !self.on_ext {
            let values = self.lookup(HeaderCollection::new(vec![view.phu()]))?;
            return Ok(values.into_iter().next().map(DescriptorValue::Scalar));
        }
        let mut values = self.lookup(view.hdr())?;
        if view.is_single() {
            return Ok(values.pop().map(DescriptorValue::Scalar));
        }
        Ok(Some(DescriptorValue::List(values)))
    }
}
