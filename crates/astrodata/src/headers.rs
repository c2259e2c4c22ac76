//! Batched keyword access across the metadata records of several units.

use std::ops::{Deref, DerefMut};

use crate::error::{MissingKeyError, Result};
use crate::fits::{Header, Value};

/// An ordered list of metadata records addressed together.
///
/// Built over shared (`&Header`) or exclusive (`&mut Header`) references;
/// mutations write straight through to the underlying records.
#[derive(Debug)]
pub struct HeaderCollection<H> {
    records: Vec<H>,
}

impl<H: Deref<Target = Header>> HeaderCollection<H> {
    pub fn new(records: Vec<H>) -> Self {
        HeaderCollection { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.records.iter().map(|h| &**h)
    }

    /// Per-record lookups plus the indices where the lookup found nothing.
    fn collect<T>(&self, f: impl Fn(&Header) -> Option<T>) -> (Vec<Option<T>>, Vec<usize>) {
        let values: Vec<Option<T>> = self.iter().map(f).collect();
        let missing = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();
        (values, missing)
    }

    /// The value of `key` in every record.
    ///
    /// Fails if any record lacks it; the error carries the values that were
    /// found so the caller can fill the gaps.
    pub fn get_all(&self, key: &str) -> std::result::Result<Vec<Value>, MissingKeyError> {
        let (values, missing_at) = self.collect(|h| h.get(key).cloned());
        if missing_at.is_empty() {
            Ok(values.into_iter().flatten().collect())
        } else {
            Err(MissingKeyError {
                keyword: key.to_string(),
                missing_at,
                values,
            })
        }
    }

    /// The value of `key` in every record, `default` where it is missing.
    pub fn get_all_or(&self, key: &str, default: impl Into<Value>) -> Vec<Value> {
        let default = default.into();
        self.get_all(key).unwrap_or_else(|err| err.fill(&default))
    }

    /// The comment of `key` in every record.
    pub fn get_comment(
        &self,
        key: &str,
    ) -> std::result::Result<Vec<Option<String>>, MissingKeyError> {
        let (found, missing_at) = self.collect(|h| h.card(key).map(|c| c.comment.clone()));
        if missing_at.is_empty() {
            return Ok(found.into_iter().flatten().collect());
        }
        Err(MissingKeyError {
            keyword: key.to_string(),
            missing_at,
            values: found
                .into_iter()
                .map(|c| c.map(|c| Value::String(c.unwrap_or_default())))
                .collect(),
        })
    }

    /// `true` if any record has `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.iter().any(|h| h.contains(key))
    }
}

impl<H: DerefMut<Target = Header>> HeaderCollection<H> {
    /// Set `key` to `value` in every record.
    pub fn set_all(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        comment: Option<&str>,
    ) -> Result<()> {
        let value = value.into();
        for record in &mut self.records {
            record.set(key, value.clone(), comment)?;
        }
        Ok(())
    }

    /// Delete `key` from every record that has it.
    ///
    /// Fails only if no record had it.
    pub fn remove(&mut self, key: &str) -> std::result::Result<(), MissingKeyError> {
        let mut removed = false;
        for record in &mut self.records {
            removed |= record.remove(key);
        }
        if removed {
            Ok(())
        } else {
            Err(MissingKeyError {
                keyword: key.to_string(),
                missing_at: (0..self.records.len()).collect(),
                values: vec![None; self.records.len()],
            })
        }
    }

    /// Replace the comment of `key` in every record.
    ///
    /// Nothing is changed if any record lacks the key.
    pub fn set_comment(
        &mut self,
        key: &str,
        comment: &str,
    ) -> std::result::Result<(), MissingKeyError> {
        let (values, missing_at) = self.collect(|h| h.get(key).cloned());
        if !missing_at.is_empty() {
            return Err(MissingKeyError {
                keyword: key.to_string(),
                missing_at,
                values,
            });
        }
        for record in &mut self.records {
            record.set_comment(key, comment);
        }
        Ok(())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Header> {
        self.records.iter_mut().map(|h| &mut **h)
    }
}
