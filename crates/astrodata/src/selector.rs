//! Selecting units by index, slice, index list or `(name, version)`.

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::error::{Error, Result};

/// Which units of a provider or view to address.
///
/// Negative indices count from the end. Slices behave like sequence slices:
/// out-of-range bounds are clamped and a negative step walks backwards.
/// A list naming one unit more than once addresses it once, at its first
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// One unit; yields a single view.
    Index(isize),
    Slice {
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    },
    List(Vec<isize>),
    /// The unit with this name and version; yields a single view.
    Named(String, i64),
}

impl Selector {
    pub fn slice(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Selector::Slice { start, stop, step }
    }

    pub fn named(name: &str, version: i64) -> Self {
        Selector::Named(name.to_string(), version)
    }

    /// Resolve against addressed units given by their `(name, version)`
    /// pairs, in order. Returns positions into that list and whether the
    /// result is a single view.
    pub fn resolve(&self, units: &[(&str, i64)]) -> Result<(Vec<usize>, bool)> {
        let len = units.len();
        match self {
            Selector::Index(index) => Ok((vec![wrap_index(*index, len)?], true)),
            Selector::List(indices) => {
                let mut resolved: Vec<usize> = Vec::with_capacity(indices.len());
                for &index in indices {
                    let position = wrap_index(index, len)?;
                    // Repeats address the same unit once.
                    if !resolved.contains(&position) {
                        resolved.push(position);
                    }
                }
                Ok((resolved, false))
            }
            Selector::Slice { start, stop, step } => {
                Ok((slice_indices(*start, *stop, step.unwrap_or(1), len)?, false))
            }
            Selector::Named(name, version) => units
                .iter()
                .position(|(n, v)| *n == name.as_str() && v == version)
                .map(|i| (vec![i], true))
                .ok_or_else(|| Error::NotFound(format!("{name} version {version}"))),
        }
    }
}

fn wrap_index(index: isize, len: usize) -> Result<usize> {
    let signed_len = len as isize;
    let wrapped = if index < 0 { index + signed_len } else { index };
    if (0..signed_len).contains(&wrapped) {
        Ok(wrapped as usize)
    } else {
        Err(Error::IndexOutOfRange { index, len })
    }
}

fn slice_indices(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    len: usize,
) -> Result<Vec<usize>> {
    if step == 0 {
        return Err(Error::InvalidValue("slice step cannot be zero"));
    }
    let len = len as isize;
    let adjust = |v: isize, lo: isize, hi: isize| (if v < 0 { v + len } else { v }).clamp(lo, hi);
    let mut indices = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |v| adjust(v, 0, len));
        let end = stop.map_or(len, |v| adjust(v, 0, len));
        while i < end {
            indices.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    } else {
        let mut i = start.map_or(len - 1, |v| adjust(v, -1, len - 1));
        let end = stop.map_or(-1, |v| adjust(v, -1, len - 1));
        while i > end {
            indices.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    }
    Ok(indices)
}

impl From<usize> for Selector {
    fn from(index: usize) -> Self {
        Selector::Index(index as isize)
    }
}

impl From<isize> for Selector {
    fn from(index: isize) -> Self {
        Selector::Index(index)
    }
}

impl From<Range<usize>> for Selector {
    fn from(r: Range<usize>) -> Self {
        Selector::slice(Some(r.start as isize), Some(r.end as isize), None)
    }
}

impl From<RangeFrom<usize>> for Selector {
    fn from(r: RangeFrom<usize>) -> Self {
        Selector::slice(Some(r.start as isize), None, None)
    }
}

impl From<RangeTo<usize>> for Selector {
    fn from(r: RangeTo<usize>) -> Self {
        Selector::slice(None, Some(r.end as isize), None)
    }
}

impl From<RangeFull> for Selector {
    fn from(_: RangeFull) -> Self {
        Selector::slice(None, None, None)
    }
}

impl From<Vec<usize>> for Selector {
    fn from(indices: Vec<usize>) -> Self {
        Selector::List(indices.into_iter().map(|i| i as isize).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: usize) -> Vec<(&'static str, i64)> {
        (1..=n as i64).map(|v| ("SCI", v)).collect()
    }

    fn resolve(selector: impl Into<Selector>, n: usize) -> (Vec<usize>, bool) {
        selector.into().resolve(&units(n)).unwrap()
    }

    #[test]
    fn indices() {
        assert_eq!(resolve(2usize, 4), (vec![2], true));
        assert_eq!(resolve(-1isize, 4), (vec![3], true));
        assert!(matches!(
            Selector::Index(4).resolve(&units(4)),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(Selector::Index(-5).resolve(&units(4)).is_err());
    }

    #[test]
    fn slices_clamp_and_reverse() {
        assert_eq!(resolve(1usize..3, 5).0, vec![1, 2]);
        assert_eq!(resolve(3usize.., 5).0, vec![3, 4]);
        assert_eq!(resolve(..10usize, 3).0, vec![0, 1, 2]);
        assert_eq!(resolve(Selector::slice(None, None, Some(2)), 5).0, vec![0, 2, 4]);
        assert_eq!(resolve(Selector::slice(None, None, Some(-1)), 3).0, vec![2, 1, 0]);
        assert_eq!(resolve(Selector::slice(Some(-2), None, None), 5).0, vec![3, 4]);
        assert_eq!(resolve(Selector::slice(Some(4), Some(0), Some(-2)), 5).0, vec![4, 2]);
        assert!(resolve(Selector::slice(Some(5), Some(2), None), 6).0.is_empty());
        assert!(Selector::slice(None, None, Some(0)).resolve(&units(3)).is_err());
    }

    #[test]
    fn huge_steps_stop_after_one_index() {
        assert_eq!(resolve(Selector::slice(Some(1), None, Some(isize::MAX)), 5).0, vec![1]);
        assert_eq!(resolve(Selector::slice(Some(-1), None, Some(isize::MIN)), 5).0, vec![4]);
        assert_eq!(resolve(Selector::slice(Some(3), None, Some(isize::MAX - 1)), 5).0, vec![3]);
    }

    #[test]
    fn lists_and_names() {
        assert_eq!(resolve(vec![3usize, 0], 4), (vec![3, 0], false));
        assert_eq!(resolve(Selector::List(vec![0, 2, 0, -4]), 4).0, vec![0, 2]);
        assert_eq!(resolve(Selector::named("SCI", 2), 3), (vec![1], true));
        assert!(matches!(
            Selector::named("SCI", 9).resolve(&units(3)),
            Err(Error::NotFound(_))
        ));
    }
}
